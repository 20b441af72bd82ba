//! Core domain models.
//!
//! Record types shared by the store, the scheduler, and the gateway:
//! scheduled prompts, execution log entries, integration settings, and
//! license accounts.

pub mod accounts;
pub mod executions;
pub mod integrations;
pub mod schedules;

pub use accounts::{LicenseAccount, hash_license_key};
pub use executions::{
    ChannelDelivery, ChannelResults, ExecutionLogEntry, ExecutionStatus, NewExecutionLog,
};
pub use integrations::{Channel, ChannelSettings, IntegrationSettings};
pub use schedules::{ChannelFlags, NewSchedule, ScheduleStatus, ScheduledPrompt, StatusCounts};
