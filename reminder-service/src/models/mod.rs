//! Data models for reminder-service.

pub mod invoice;
pub mod milestone;
pub mod payment;
pub mod plan;
pub mod reminder;
pub mod timeline;

pub use invoice::{Client, Invoice, InvoiceStatus, LateFeePolicy, LateFeeType, PaymentTerms};
pub use milestone::{InvoiceView, Milestone, MilestoneKind};
pub use payment::{total_paid, Payment};
pub use plan::PlanTier;
pub use reminder::{
    ReminderRecord, ReminderRule, ReminderSettings, ReminderStatus, ReminderTone, RuleType,
};
pub use timeline::{TimelineEntry, TimelineEntryKind};
