pub mod basket;
pub mod contract;
