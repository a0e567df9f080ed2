use std::collections::BTreeSet;

pub trait GetYear {
    fn get_year(&self) -> i32;
}

pub trait CheckYearsExt {
    fn get_years(&self) -> BTreeSet<i32>;
    fn check_years(&self, year: i32) -> Result<(), BTreeSet<i32>>;
}

/// Blanket implementation for every slice whose items implement `GetYear`.
impl<T> CheckYearsExt for [T]
where
    T: GetYear,
{
    fn get_years(&self) -> BTreeSet<i32> {
        self.iter().map(|item| item.get_year()).collect()
    }

    /// Ensure the given year is present in the input.
    fn check_years(&self, year: i32) -> Result<(), BTreeSet<i32>> {
        let years = self.get_years();

        if years.contains(&year) {
            Ok(())
        } else {
            Err(years)
        }
    }
}
