//! Run lifecycle: creation, fan-out of per-site chains, publication and the
//! notifications around them.

pub mod notify;
pub mod report;
pub mod run;

pub use notify::{notifier_for, LogNotifier, MailNotifier, Notification, Notifier};
pub use report::{JsonSummaryRenderer, ReportRenderer, RunReport};
pub use run::{IllegalTransition, LaunchSettings, LaunchSummary, PublishedRun, RunOrchestrator, RunState};
