use crate::core::{Entity, EntityKind, Result, SyncError, Timestamp};
use crate::sync::{OperationResult, SyncEngine};
use chrono::{Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

pub type TaskEngine = SyncEngine<Task>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    #[serde(alias = "done")]
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Completed tasks reopen as pending; everything else completes.
    pub fn toggled(self) -> Self {
        match self {
            Self::Completed => Self::Pending,
            _ => Self::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Planning phase a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskCategory {
    Foundation,
    Venue,
    Guests,
    Budget,
    Design,
    Organization,
    Final,
    #[default]
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub category: TaskCategory,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_overdue(&self, now: Timestamp) -> bool {
        !self.is_completed() && self.due_date.is_some_and(|due| due < now)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub category: TaskCategory,
    pub priority: TaskPriority,
    pub due_date: Option<Timestamp>,
    pub assigned_to: Option<String>,
    pub notes: Option<String>,
    pub template_id: Option<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn category(mut self, category: TaskCategory) -> Self {
        self.category = category;
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn due(mut self, due_date: Timestamp) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn assigned_to(mut self, assignee: impl Into<String>) -> Self {
        self.assigned_to = Some(assignee.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Partial task update. The nested options clear a field when set to `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<TaskCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<Timestamp>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Option<Timestamp>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_category(mut self, category: TaskCategory) -> Self {
        self.category = Some(category);
        self
    }
}

fn require_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(SyncError::validation("Task title is required"));
    }
    Ok(())
}

impl EntityKind for Task {
    type Draft = TaskDraft;
    type Patch = TaskPatch;

    const KIND: &'static str = "tasks";
    const ID_PREFIX: &'static str = "task";

    fn validate_draft(draft: &TaskDraft) -> Result<()> {
        require_title(&draft.title)
    }

    fn from_draft(draft: TaskDraft, _now: Timestamp) -> Self {
        Self {
            title: draft.title.trim().to_string(),
            description: draft.description,
            category: draft.category,
            priority: draft.priority,
            status: TaskStatus::Pending,
            due_date: draft.due_date,
            completed_at: None,
            assigned_to: draft.assigned_to,
            notes: draft.notes,
            template_id: draft.template_id,
        }
    }

    fn validate_patch(patch: &TaskPatch) -> Result<()> {
        match &patch.title {
            Some(title) => require_title(title),
            None => Ok(()),
        }
    }

    fn apply_patch(&mut self, patch: &TaskPatch, _now: Timestamp) {
        if let Some(title) = &patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(assigned_to) = &patch.assigned_to {
            self.assigned_to = assigned_to.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
    }

    /// Appends to the end of the task's category.
    fn initial_sort_order(fields: &Self, existing: &[Entity<Self>]) -> Option<i64> {
        let in_category = existing
            .iter()
            .filter(|task| task.fields.category == fields.category)
            .count();
        Some(in_category as i64)
    }

    fn fixtures(scope_id: &str, now: Timestamp) -> Vec<Entity<Self>> {
        let days = Duration::days;
        let fixture = |id: &str,
                       title: &str,
                       description: &str,
                       category: TaskCategory,
                       priority: TaskPriority,
                       status: TaskStatus,
                       due: Duration,
                       completed: Option<Duration>,
                       created: Duration,
                       updated: Duration| {
            let task = Task {
                title: title.to_string(),
                description: Some(description.to_string()),
                category,
                priority,
                status,
                due_date: Some(now + due),
                completed_at: completed.map(|offset| now + offset),
                assigned_to: None,
                notes: None,
                template_id: None,
            };
            Entity::new(id, scope_id, task, now + created)
                .with_timestamps(now + created, now + updated)
        };

        let mut tasks = vec![
            fixture(
                "demo-task-1",
                "Book the venue",
                "Find and book a place for the ceremony and the reception",
                TaskCategory::Venue,
                TaskPriority::High,
                TaskStatus::Completed,
                days(-30),
                Some(days(-25)),
                days(-60),
                days(-25),
            ),
            fixture(
                "demo-task-2",
                "Hire a wedding photographer",
                "Find and book a professional wedding photographer",
                TaskCategory::Organization,
                TaskPriority::High,
                TaskStatus::InProgress,
                days(14),
                None,
                days(-45),
                days(-5),
            ),
            fixture(
                "demo-task-3",
                "Choose the wedding dress",
                "Find and order the dress including alterations",
                TaskCategory::Design,
                TaskPriority::Medium,
                TaskStatus::Pending,
                days(30),
                None,
                days(-30),
                days(-30),
            ),
            fixture(
                "demo-task-4",
                "Book music or a DJ",
                "Arrange music for the ceremony and the reception",
                TaskCategory::Organization,
                TaskPriority::High,
                TaskStatus::Pending,
                days(45),
                None,
                days(-20),
                days(-20),
            ),
            fixture(
                "demo-task-5",
                "Order the wedding cake",
                "Pick and order a cake sized for the guest count",
                TaskCategory::Budget,
                TaskPriority::Medium,
                TaskStatus::Completed,
                days(-10),
                Some(days(-8)),
                days(-40),
                days(-8),
            ),
        ];
        for i in 0..tasks.len() {
            let order = Self::initial_sort_order(&tasks[i].fields, &tasks[..i]);
            tasks[i].sort_order = order;
        }
        tasks
    }
}

/// A predefined planning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTemplate {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub category: TaskCategory,
    pub priority: TaskPriority,
    pub recommended_weeks_before: i64,
    pub is_required: bool,
    pub tips: &'static [&'static str],
}

const TASK_TEMPLATES: &[TaskTemplate] = &[
    TaskTemplate {
        id: "foundation-001",
        title: "Set the wedding date",
        description: "Pick a date and check that the key guests are available",
        category: TaskCategory::Foundation,
        priority: TaskPriority::Urgent,
        recommended_weeks_before: 52,
        is_required: true,
        tips: &["Check the closest family first", "Avoid public holidays"],
    },
    TaskTemplate {
        id: "foundation-002",
        title: "Set the wedding budget",
        description: "Agree on the total budget and split it by category",
        category: TaskCategory::Foundation,
        priority: TaskPriority::Urgent,
        recommended_weeks_before: 52,
        is_required: true,
        tips: &["Keep a 10-20% reserve", "Track spending as you go"],
    },
    TaskTemplate {
        id: "foundation-003",
        title: "Draft the guest list",
        description: "Put together a first list of everyone to invite",
        category: TaskCategory::Foundation,
        priority: TaskPriority::High,
        recommended_weeks_before: 48,
        is_required: true,
        tips: &["Start with the closest family", "Expect 80-90% attendance"],
    },
    TaskTemplate {
        id: "venue-001",
        title: "Choose the ceremony venue",
        description: "Find and book the place for the ceremony",
        category: TaskCategory::Venue,
        priority: TaskPriority::Urgent,
        recommended_weeks_before: 44,
        is_required: true,
        tips: &["Visit at the same time of day as the ceremony"],
    },
    TaskTemplate {
        id: "venue-002",
        title: "Choose the reception venue",
        description: "Find and book the place for the reception",
        category: TaskCategory::Venue,
        priority: TaskPriority::High,
        recommended_weeks_before: 44,
        is_required: false,
        tips: &["Ask about catering restrictions"],
    },
    TaskTemplate {
        id: "guests-001",
        title: "Send the invitations",
        description: "Print and send invitations with an RSVP deadline",
        category: TaskCategory::Guests,
        priority: TaskPriority::High,
        recommended_weeks_before: 12,
        is_required: true,
        tips: &["Set the RSVP deadline four weeks before the wedding"],
    },
    TaskTemplate {
        id: "design-001",
        title: "Order the flowers",
        description: "Agree on bouquets and decorations with a florist",
        category: TaskCategory::Design,
        priority: TaskPriority::Medium,
        recommended_weeks_before: 8,
        is_required: false,
        tips: &[],
    },
    TaskTemplate {
        id: "final-001",
        title: "Confirm all vendors",
        description: "Call every vendor to confirm times and details",
        category: TaskCategory::Final,
        priority: TaskPriority::Urgent,
        recommended_weeks_before: 1,
        is_required: true,
        tips: &["Share the day's timeline with everyone"],
    },
];

pub fn task_templates() -> &'static [TaskTemplate] {
    TASK_TEMPLATES
}

pub fn find_template(id: &str) -> Option<&'static TaskTemplate> {
    TASK_TEMPLATES.iter().find(|template| template.id == id)
}

/// Parameters for creating a task from a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateRequest {
    pub template_id: String,
    pub custom_title: Option<String>,
    pub custom_due_date: Option<Timestamp>,
    pub assigned_to: Option<String>,
    pub notes: Option<String>,
}

impl TemplateRequest {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            ..Self::default()
        }
    }

    pub fn due(mut self, due_date: Timestamp) -> Self {
        self.custom_due_date = Some(due_date);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskBulkOperation {
    /// Toggles every task, same as calling `toggle_status` per id.
    Complete(Vec<String>),
    Delete(Vec<String>),
    Update(Vec<String>, TaskPatch),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilters {
    pub status: Vec<TaskStatus>,
    pub category: Vec<TaskCategory>,
    pub priority: Vec<TaskPriority>,
    pub assigned_to: Option<String>,
    pub search: Option<String>,
    pub due_from: Option<Timestamp>,
    pub due_to: Option<Timestamp>,
}

impl TaskFilters {
    pub fn matches(&self, task: &Task) -> bool {
        if !self.status.is_empty() && !self.status.contains(&task.status) {
            return false;
        }
        if !self.category.is_empty() && !self.category.contains(&task.category) {
            return false;
        }
        if !self.priority.is_empty() && !self.priority.contains(&task.priority) {
            return false;
        }
        if let Some(assignee) = &self.assigned_to {
            if task.assigned_to.as_ref() != Some(assignee) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !task.title.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        // Tasks without a due date pass the window.
        if let Some(due) = task.due_date {
            if self.due_from.is_some_and(|from| due < from) {
                return false;
            }
            if self.due_to.is_some_and(|to| due > to) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub overdue: usize,
    /// Open tasks due within the next seven days.
    pub upcoming: usize,
    /// Rounded percentage of completed tasks.
    pub completion_rate: u32,
}

impl TaskStats {
    pub fn compute(tasks: &[Entity<Task>], now: Timestamp) -> Self {
        let week_ahead = now + Duration::days(7);
        let mut stats = Self {
            total: tasks.len(),
            ..Self::default()
        };
        for task in tasks.iter().map(|entity| &entity.fields) {
            match task.status {
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Cancelled => {}
            }
            if task.is_overdue(now) {
                stats.overdue += 1;
            }
            if !task.is_completed() && task.due_date.is_some_and(|due| due >= now && due <= week_ahead) {
                stats.upcoming += 1;
            }
        }
        if stats.total > 0 {
            stats.completion_rate =
                ((stats.completed as f64 / stats.total as f64) * 100.0).round() as u32;
        }
        stats
    }
}

impl SyncEngine<Task> {
    /// Flips a task between completed and pending, stamping or clearing `completedAt`.
    pub async fn toggle_status(&self, id: &str) -> Result<OperationResult<()>> {
        let Some(task) = self.get(id)? else {
            warn!("toggle of task '{}' ignored: not found", id);
            return Ok(OperationResult::skipped(()));
        };
        let status = task.fields.status.toggled();
        let completed_at = (status == TaskStatus::Completed).then(Utc::now);
        let patch = TaskPatch {
            status: Some(status),
            completed_at: Some(completed_at),
            ..TaskPatch::default()
        };
        self.update(id, patch).await
    }

    pub async fn create_from_template(
        &self,
        request: TemplateRequest,
    ) -> Result<OperationResult<Entity<Task>>> {
        let Some(template) = find_template(&request.template_id) else {
            return Err(SyncError::validation(format!(
                "Unknown task template '{}'",
                request.template_id
            )));
        };
        let notes = request.notes.or_else(|| {
            (!template.tips.is_empty()).then(|| template.tips.join("\n"))
        });
        let draft = TaskDraft {
            title: request
                .custom_title
                .unwrap_or_else(|| template.title.to_string()),
            description: Some(template.description.to_string()),
            category: template.category,
            priority: template.priority,
            due_date: request.custom_due_date,
            assigned_to: request.assigned_to,
            notes,
            template_id: Some(template.id.to_string()),
        };
        self.create(draft).await
    }

    /// Creates the required templates the scope does not hold yet, each due
    /// its recommended number of weeks before the wedding.
    pub async fn initialize_from_templates(
        &self,
        wedding_date: Timestamp,
    ) -> Result<Vec<OperationResult<Entity<Task>>>> {
        let present: Vec<String> = self
            .entities()?
            .into_iter()
            .filter_map(|task| task.fields.template_id)
            .collect();

        let mut created = Vec::new();
        for template in TASK_TEMPLATES.iter().filter(|t| t.is_required) {
            if present.iter().any(|id| id == template.id) {
                continue;
            }
            let due = wedding_date - Duration::weeks(template.recommended_weeks_before);
            created.push(
                self.create_from_template(TemplateRequest::new(template.id).due(due))
                    .await?,
            );
        }
        Ok(created)
    }

    pub async fn bulk(&self, operation: TaskBulkOperation) -> Result<Vec<OperationResult<()>>> {
        match operation {
            TaskBulkOperation::Complete(ids) => {
                let mut results = Vec::with_capacity(ids.len());
                for id in &ids {
                    results.push(self.toggle_status(id).await?);
                }
                Ok(results)
            }
            TaskBulkOperation::Delete(ids) => self.bulk_remove(&ids).await,
            TaskBulkOperation::Update(ids, patch) => self.bulk_update(&ids, patch).await,
        }
    }

    pub fn filtered_tasks(&self, filters: &TaskFilters) -> Result<Vec<Entity<Task>>> {
        self.get_filtered(|task| filters.matches(&task.fields))
    }

    pub fn tasks_by_category(&self, category: TaskCategory) -> Result<Vec<Entity<Task>>> {
        let mut tasks = self.get_filtered(|task| task.fields.category == category)?;
        tasks.sort_by_key(|task| task.sort_order.unwrap_or(0));
        Ok(tasks)
    }

    pub fn task_stats(&self) -> Result<TaskStats> {
        Ok(TaskStats::compute(&self.entities()?, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str, status: TaskStatus, due_in_days: i64, now: Timestamp) -> Entity<Task> {
        let mut fields = Task::from_draft(TaskDraft::new(id), now);
        fields.status = status;
        fields.due_date = Some(now + Duration::days(due_in_days));
        Entity::new(id, "w1", fields, now)
    }

    #[test]
    fn blank_title_is_rejected() {
        assert!(matches!(
            Task::validate_draft(&TaskDraft::new("   ")),
            Err(SyncError::Validation(_))
        ));
        assert!(Task::validate_draft(&TaskDraft::new("Book venue")).is_ok());
        assert!(Task::validate_patch(&TaskPatch::title("")).is_err());
    }

    #[test]
    fn sort_order_counts_the_category() {
        let now = Utc::now();
        let existing = vec![
            Entity::new("a", "w1", Task::from_draft(TaskDraft::new("a").category(TaskCategory::Venue), now), now),
            Entity::new("b", "w1", Task::from_draft(TaskDraft::new("b").category(TaskCategory::Design), now), now),
        ];
        let venue = Task::from_draft(TaskDraft::new("c").category(TaskCategory::Venue), now);
        let budget = Task::from_draft(TaskDraft::new("d").category(TaskCategory::Budget), now);
        assert_eq!(Task::initial_sort_order(&venue, &existing), Some(1));
        assert_eq!(Task::initial_sort_order(&budget, &existing), Some(0));
    }

    #[test]
    fn clearing_patch_serializes_null() {
        let patch = TaskPatch {
            status: Some(TaskStatus::Pending),
            completed_at: Some(None),
            ..TaskPatch::default()
        };
        let fields = Task::patch_to_remote(&patch, Utc::now()).unwrap();
        assert_eq!(fields["status"], json!("pending"));
        assert_eq!(fields["completedAt"], json!(null));
        assert!(fields.contains_key("updatedAt"));
        assert!(!fields.contains_key("title"));
    }

    #[test]
    fn done_reads_as_completed() {
        let status: TaskStatus = serde_json::from_value(json!("done")).unwrap();
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(status.toggled(), TaskStatus::Pending);
        assert_eq!(TaskStatus::InProgress.toggled(), TaskStatus::Completed);
    }

    #[test]
    fn stats_count_overdue_and_upcoming() {
        let now = Utc::now();
        let tasks = vec![
            task("a", TaskStatus::Completed, -3, now),
            task("b", TaskStatus::Pending, -1, now),
            task("c", TaskStatus::InProgress, 3, now),
            task("d", TaskStatus::Pending, 30, now),
        ];
        let stats = TaskStats::compute(&tasks, now);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.upcoming, 1);
        assert_eq!(stats.completion_rate, 25);
    }

    #[test]
    fn filters_combine() {
        let now = Utc::now();
        let mut urgent = task("Book venue", TaskStatus::Pending, 5, now);
        urgent.fields.priority = TaskPriority::Urgent;
        let filters = TaskFilters {
            priority: vec![TaskPriority::Urgent],
            search: Some("VENUE".to_string()),
            due_to: Some(now + Duration::days(10)),
            ..TaskFilters::default()
        };
        assert!(filters.matches(&urgent.fields));
        urgent.fields.due_date = Some(now + Duration::days(20));
        assert!(!filters.matches(&urgent.fields));
    }

    #[test]
    fn fixtures_belong_to_the_scope() {
        let now = Utc::now();
        let fixtures = Task::fixtures("demo", now);
        assert_eq!(fixtures.len(), 5);
        assert!(fixtures.iter().all(|task| task.parent_scope_id() == "demo"));
        assert!(fixtures.iter().all(|task| task.updated_at() >= task.created_at()));

        let organization: Vec<_> = fixtures
            .iter()
            .filter(|task| task.fields.category == TaskCategory::Organization)
            .map(|task| task.sort_order)
            .collect();
        assert_eq!(organization, vec![Some(0), Some(1)]);
        let venue = fixtures.iter().find(|task| task.id() == "demo-task-1").unwrap();
        assert_eq!(venue.sort_order, Some(0));
    }
}
