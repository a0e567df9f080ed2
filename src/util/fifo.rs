//! FIFO implemented using VecDeque
use crate::util::Splittable;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::vec_deque::{IntoIter, Iter};
use std::collections::VecDeque;
use std::cmp::Ordering;

#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct FIFO<A> {
    deq: VecDeque<A>,
}

/// The result of taking a magnitude from the front of a [`FIFO`].
#[derive(Debug)]
pub struct SplittableTakeWhile<A> {
    /// Items taken, oldest first. The last one may be a partial split.
    pub takes: Vec<A>,

    /// The magnitude that could not be filled because the FIFO ran dry.
    pub unfilled: Decimal,
}

impl<A> Default for FIFO<A> {
    fn default() -> Self {
        Self {
            deq: VecDeque::new(),
        }
    }
}

impl<A> FIFO<A> {
    pub fn new() -> Self {
        Self {
            deq: VecDeque::new(),
        }
    }
    pub fn iter(&self) -> Iter<'_, A> {
        self.deq.iter()
    }
    pub fn append_back(&mut self, e: A) {
        self.deq.push_back(e);
    }
    pub fn pop_front(&mut self) -> Option<A> {
        self.deq.pop_front()
    }
    pub fn push_front(&mut self, e: A) {
        // a LIFO thing, used for splits
        //   (intended sequence: pop; split -> (a,b); consume a; push_front b;)
        self.deq.push_front(e);
    }
    pub fn peek_front(&self) -> Option<&A> {
        self.deq.front()
    }
    pub fn is_empty(&self) -> bool {
        self.deq.is_empty()
    }
}

impl<A: Splittable> FIFO<A> {
    /// Take items from the front until their magnitudes sum to `amount`.
    ///
    /// A partially consumed item is split; its remainder goes back to the front of the queue. Asking
    /// for more than the queue holds is not an error: the queue is emptied and the shortfall is
    /// reported in [`SplittableTakeWhile::unfilled`].
    pub fn splittable_take_while(&mut self, amount: Decimal) -> SplittableTakeWhile<A> {
        let mut takes = Vec::new(); // build up the return vector here
        let mut so_far = Decimal::ZERO;

        if amount <= Decimal::ZERO {
            return SplittableTakeWhile {
                takes,
                unfilled: Decimal::ZERO,
            };
        }

        while let Some(x) = self.pop_front() {
            let sum = so_far + x.magnitude();

            match sum.cmp(&amount) {
                Ordering::Equal => {
                    // there is no remainder
                    takes.push(x);

                    return SplittableTakeWhile {
                        takes,
                        unfilled: Decimal::ZERO,
                    };
                }
                Ordering::Greater => {
                    // there is a remainder
                    let split = x.split(amount - so_far);

                    takes.push(split.take);
                    self.push_front(split.leave);

                    return SplittableTakeWhile {
                        takes,
                        unfilled: Decimal::ZERO,
                    };
                }
                Ordering::Less => {
                    // We are consuming the entire item and continuing the loop.
                    takes.push(x);

                    so_far = sum;
                }
            }
        }

        SplittableTakeWhile {
            takes,
            unfilled: amount - so_far,
        }
    }
}

impl<A> FromIterator<A> for FIFO<A> {
    fn from_iter<T: IntoIterator<Item = A>>(iter: T) -> Self {
        let mut deq = FIFO::<A>::new();
        deq.extend(iter);
        deq
    }
}

impl<A> IntoIterator for FIFO<A> {
    type Item = A;
    type IntoIter = IntoIter<Self::Item>;
    fn into_iter(self) -> Self::IntoIter {
        self.deq.into_iter()
    }
}

impl<'a, A> IntoIterator for &'a FIFO<A> {
    type Item = &'a A;
    type IntoIter = Iter<'a, A>;
    fn into_iter(self) -> Self::IntoIter {
        self.deq.iter()
    }
}

impl<A> Extend<A> for FIFO<A> {
    fn extend<T: IntoIterator<Item = A>>(&mut self, iter: T) {
        for item in iter.into_iter() {
            self.append_back(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::HasSplit;
    use rust_decimal_macros::dec;
    use tracing_test::traced_test;

    #[derive(Debug, Eq, PartialEq)]
    struct Chunk(u32, Decimal);

    impl Splittable for Chunk {
        fn magnitude(&self) -> Decimal {
            self.1
        }

        fn split(self, magnitude: Decimal) -> HasSplit<Self> {
            HasSplit {
                take: Chunk(self.0, magnitude),
                leave: Chunk(self.0, self.1 - magnitude),
            }
        }
    }

    #[test]
    #[traced_test]
    fn test_take_while_splits_front() {
        let mut fifo = FIFO::from_iter([Chunk(1, dec!(10)), Chunk(2, dec!(5))]);

        let taken = fifo.splittable_take_while(dec!(12));
        assert_eq!(taken.takes, vec![Chunk(1, dec!(10)), Chunk(2, dec!(2))]);
        assert_eq!(taken.unfilled, Decimal::ZERO);
        assert_eq!(fifo.iter().count(), 1);
        assert_eq!(fifo.peek_front(), Some(&Chunk(2, dec!(3))));
    }

    #[test]
    #[traced_test]
    fn test_take_while_underflow() {
        let mut fifo = FIFO::from_iter([Chunk(1, dec!(4))]);

        let taken = fifo.splittable_take_while(dec!(7));
        assert_eq!(taken.takes, vec![Chunk(1, dec!(4))]);
        assert_eq!(taken.unfilled, dec!(3));
        assert!(fifo.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_take_while_zero() {
        let mut fifo = FIFO::from_iter([Chunk(1, dec!(4))]);

        let taken = fifo.splittable_take_while(Decimal::ZERO);
        assert!(taken.takes.is_empty());
        assert_eq!(fifo.iter().count(), 1);
    }
}
