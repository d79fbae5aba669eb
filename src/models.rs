pub mod appointment;
pub mod payment;
pub mod policy;
pub mod pricing;
pub mod scheduling;
