pub mod filter;
pub mod reload;
pub mod status;
pub mod terms;
