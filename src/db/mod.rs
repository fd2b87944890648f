pub mod billing_repository;
pub mod mock_billing_repository;
pub mod postgres_billing_repository;
