pub mod positions;
pub mod run;
