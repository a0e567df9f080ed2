/// Row counts per transaction code, printed at the end of a run.
#[derive(Debug, Default)]
pub struct Stats {
    n_money_movement_rows: i32,
    n_trade_rows: i32,
    n_receive_deliver_rows: i32,
    n_skipped_rows: i32,
}

impl Stats {
    pub fn inc_money_movements(&mut self) {
        self.n_money_movement_rows += 1;
    }

    pub fn inc_trades(&mut self) {
        self.n_trade_rows += 1;
    }

    pub fn inc_receive_deliver(&mut self) {
        self.n_receive_deliver_rows += 1;
    }

    pub fn inc_skipped(&mut self) {
        self.n_skipped_rows += 1;
    }

    pub fn pretty_print(&self) {
        println!("{self:#?}");
        println!();
    }
}
