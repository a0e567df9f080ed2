use rust_decimal::Decimal;

pub mod fifo;
pub mod year_ext;

pub struct HasSplit<A: Sized> {
    pub(crate) take: A,
    pub(crate) leave: A, // non-maybe.  consequence of split.
}

/// Queue items that can be divided by an unsigned magnitude.
///
/// All items in one queue carry the same sign. `magnitude` is always non-negative, and `split`
/// is only called with `0 < magnitude < self.magnitude()`.
pub trait Splittable: Sized {
    fn magnitude(&self) -> Decimal;

    fn split(self, magnitude: Decimal) -> HasSplit<Self>;
}
