//! Domain models for dojo-billing.

mod discount;
mod family;
mod invoice;
mod line_item;
mod payment;
mod tax_rate;

pub use discount::{
    DiscountCode, DiscountIneligibility, DiscountScope, DiscountType, DiscountValidationResult,
    UsageType,
};
pub use family::{Enrollment, Family, Student};
pub use invoice::{Invoice, InvoiceLineItem, InvoiceStatus};
pub use line_item::{ChargeLineItem, ItemType, ServicePeriod};
pub use payment::{CreatePayment, Payment, PaymentPayee, PaymentStatus, PaymentTax, PaymentType};
pub use tax_rate::{AppliedTaxRate, TaxRate, TaxSnapshot};
