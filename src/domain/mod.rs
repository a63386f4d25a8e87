//! Collections synchronized by the engine.

pub mod budget;
pub mod guest;
pub mod task;

pub use budget::{
    BudgetCategory, BudgetDraft, BudgetEngine, BudgetItem, BudgetPatch, BudgetPayment, BudgetStats,
    PaymentMethod, PaymentStatus,
};
pub use guest::{
    Guest, GuestCategory, GuestDraft, GuestEngine, GuestFilters, GuestPatch, GuestStats,
    InvitationType, RsvpStatus,
};
pub use task::{
    Task, TaskBulkOperation, TaskCategory, TaskDraft, TaskEngine, TaskFilters, TaskPatch,
    TaskPriority, TaskStats, TaskStatus, TaskTemplate, TemplateRequest, find_template,
    task_templates,
};
