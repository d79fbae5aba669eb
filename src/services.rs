pub mod appointment_service;
pub mod availability_service;
pub mod booking_service;
pub mod lifecycle;
pub mod notification_service;
pub mod payment_service;
pub mod policy_service;
pub mod pricing_service;
pub mod reservation_service;
pub mod slot_model;
