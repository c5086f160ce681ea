pub mod balance;
pub mod calculations;
pub mod entities;
pub mod errors;
pub mod inputs;
pub mod money;
pub mod numbering;
pub mod ports;
pub mod queries;
pub mod services;
pub mod settings;
pub mod value_objects;

pub use balance::{DueDateStatus, DueState, Settlement, balance_due, due_date_status};
pub use calculations::{BillingTotals, LineItemAmounts, compute_line_item, compute_totals};
pub use entities::{Invoice, LineItem, Payment, Quote, totals_for};
pub use errors::BillingError;
pub use inputs::{
  CreateInvoiceInput, CreatePaymentInput, CreateQuoteInput, LineItemInput, UpdateInvoiceInput,
  UpdateQuoteInput,
};
pub use money::{currency_equals, format_currency, round};
pub use numbering::{CounterKey, NumberingConfig, NumberingSequencer};
pub use ports::BillingRepository;
pub use queries::{InvoiceFilters, PageRequest, PaginatedResponse, QuoteFilters};
pub use services::{BillingService, BillingServiceDependencies};
pub use settings::BillingSettings;
pub use value_objects::{
  Currency, CustomerInfo, DocumentKind, InvoiceStatus, LineItemDescription, PaymentAmount,
  PaymentMethod, Percentage, Quantity, QuoteStatus, UnitPrice, ValueObjectError,
};
