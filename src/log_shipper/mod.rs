pub mod shipper;

pub use shipper::LogShipper;
