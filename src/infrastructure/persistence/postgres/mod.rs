mod rows;

pub mod counter_store;
pub mod invoice_repository;
pub mod payment_repository;
pub mod quote_repository;

pub use counter_store::PostgresCounterStore;
pub use invoice_repository::PostgresInvoiceRepository;
pub use payment_repository::PostgresPaymentRepository;
pub use quote_repository::PostgresQuoteRepository;
