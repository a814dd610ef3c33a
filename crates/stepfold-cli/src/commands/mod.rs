pub mod check;
pub mod rank;
pub mod run;
