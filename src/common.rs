pub mod clock;
pub mod error;
pub mod i18n;
