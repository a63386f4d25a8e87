use crate::core::{Entity, EntityKind, Result, SyncError, Timestamp};
use crate::sync::{LocalIdGenerator, OperationResult, SyncEngine};
use chrono::{Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

pub type BudgetEngine = SyncEngine<BudgetItem>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetCategory {
    Venue,
    Catering,
    Photography,
    Videography,
    Flowers,
    Music,
    Decoration,
    Dress,
    Suit,
    Rings,
    Invitations,
    Transportation,
    Accommodation,
    Beauty,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Partial,
    Paid,
    Overdue,
    Cancelled,
}

impl PaymentStatus {
    /// Status implied by the amounts and the due date. Cancelled items stay cancelled.
    pub fn derive(
        current: Self,
        paid: f64,
        actual: f64,
        due_date: Option<Timestamp>,
        now: Timestamp,
    ) -> Self {
        if current == Self::Cancelled {
            Self::Cancelled
        } else if actual > 0.0 && paid >= actual {
            Self::Paid
        } else if due_date.is_some_and(|due| due < now) {
            Self::Overdue
        } else if paid > 0.0 {
            Self::Partial
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Invoice,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetPayment {
    pub id: String,
    pub amount: f64,
    pub date: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub category: BudgetCategory,
    #[serde(default)]
    pub budgeted_amount: f64,
    #[serde(default)]
    pub actual_amount: f64,
    #[serde(default)]
    pub paid_amount: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_date: Option<Timestamp>,
    #[serde(default)]
    pub payments: Vec<BudgetPayment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_estimate: bool,
}

impl BudgetItem {
    pub fn remaining_to_pay(&self) -> f64 {
        (self.actual_amount - self.paid_amount).max(0.0)
    }

    pub fn is_over_budget(&self) -> bool {
        self.actual_amount > self.budgeted_amount
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDraft {
    pub name: String,
    pub description: Option<String>,
    pub category: BudgetCategory,
    pub budgeted_amount: f64,
    pub actual_amount: f64,
    pub currency: String,
    pub vendor_name: Option<String>,
    pub due_date: Option<Timestamp>,
    pub notes: Option<String>,
    pub is_estimate: bool,
}

impl Default for BudgetDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            category: BudgetCategory::Other,
            budgeted_amount: 0.0,
            actual_amount: 0.0,
            currency: "CZK".to_string(),
            vendor_name: None,
            due_date: None,
            notes: None,
            is_estimate: false,
        }
    }
}

impl BudgetDraft {
    pub fn new(name: impl Into<String>, category: BudgetCategory, budgeted_amount: f64) -> Self {
        Self {
            name: name.into(),
            category,
            budgeted_amount,
            ..Self::default()
        }
    }

    pub fn actual(mut self, amount: f64) -> Self {
        self.actual_amount = amount;
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn due(mut self, due_date: Timestamp) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<BudgetCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budgeted_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<Timestamp>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_date: Option<Option<Timestamp>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payments: Option<Vec<BudgetPayment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

fn check_amount(value: f64, field: &str) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(SyncError::validation(format!(
            "Budget {} must be a non-negative number, got {}",
            field, value
        )));
    }
    Ok(())
}

fn check_currency(currency: &str) -> Result<()> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(SyncError::validation(format!(
            "Currency must be a three-letter code, got '{}'",
            currency
        )));
    }
    Ok(())
}

impl EntityKind for BudgetItem {
    type Draft = BudgetDraft;
    type Patch = BudgetPatch;

    const KIND: &'static str = "budgetItems";
    const ID_PREFIX: &'static str = "budget";

    fn validate_draft(draft: &BudgetDraft) -> Result<()> {
        if draft.name.trim().is_empty() {
            return Err(SyncError::validation("Budget item name is required"));
        }
        check_amount(draft.budgeted_amount, "budgeted amount")?;
        check_amount(draft.actual_amount, "actual amount")?;
        check_currency(&draft.currency)
    }

    fn from_draft(draft: BudgetDraft, now: Timestamp) -> Self {
        let payment_status =
            PaymentStatus::derive(PaymentStatus::Pending, 0.0, draft.actual_amount, draft.due_date, now);
        Self {
            name: draft.name.trim().to_string(),
            description: draft.description,
            category: draft.category,
            budgeted_amount: draft.budgeted_amount,
            actual_amount: draft.actual_amount,
            paid_amount: 0.0,
            currency: draft.currency,
            vendor_name: draft.vendor_name,
            payment_status,
            due_date: draft.due_date,
            paid_date: None,
            payments: Vec::new(),
            notes: draft.notes,
            is_estimate: draft.is_estimate,
        }
    }

    fn validate_patch(patch: &BudgetPatch) -> Result<()> {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(SyncError::validation("Budget item name is required"));
            }
        }
        for (value, field) in [
            (patch.budgeted_amount, "budgeted amount"),
            (patch.actual_amount, "actual amount"),
            (patch.paid_amount, "paid amount"),
        ] {
            if let Some(value) = value {
                check_amount(value, field)?;
            }
        }
        match &patch.currency {
            Some(currency) => check_currency(currency),
            None => Ok(()),
        }
    }

    fn apply_patch(&mut self, patch: &BudgetPatch, _now: Timestamp) {
        if let Some(name) = &patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(amount) = patch.budgeted_amount {
            self.budgeted_amount = amount;
        }
        if let Some(amount) = patch.actual_amount {
            self.actual_amount = amount;
        }
        if let Some(amount) = patch.paid_amount {
            self.paid_amount = amount;
        }
        if let Some(currency) = &patch.currency {
            self.currency = currency.clone();
        }
        if let Some(vendor_name) = &patch.vendor_name {
            self.vendor_name = vendor_name.clone();
        }
        if let Some(status) = patch.payment_status {
            self.payment_status = status;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(paid_date) = patch.paid_date {
            self.paid_date = paid_date;
        }
        if let Some(payments) = &patch.payments {
            self.payments = payments.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
    }

    fn fixtures(scope_id: &str, now: Timestamp) -> Vec<Entity<Self>> {
        let created = now - Duration::days(45);
        let item = |id: &str,
                    name: &str,
                    category: BudgetCategory,
                    budgeted: f64,
                    actual: f64,
                    paid: f64,
                    due_in_days: i64| {
            let due_date = Some(now + Duration::days(due_in_days));
            let payments = if paid > 0.0 {
                vec![BudgetPayment {
                    id: format!("{}-payment-1", id),
                    amount: paid,
                    date: now - Duration::days(10),
                    method: Some(PaymentMethod::Transfer),
                    note: None,
                }]
            } else {
                Vec::new()
            };
            let status = PaymentStatus::derive(PaymentStatus::Pending, paid, actual, due_date, now);
            let fields = BudgetItem {
                name: name.to_string(),
                description: None,
                category,
                budgeted_amount: budgeted,
                actual_amount: actual,
                paid_amount: paid,
                currency: "CZK".to_string(),
                vendor_name: None,
                payment_status: status,
                due_date,
                paid_date: (status == PaymentStatus::Paid).then(|| now - Duration::days(10)),
                payments,
                notes: None,
                is_estimate: actual == 0.0,
            };
            Entity::new(id, scope_id, fields, created)
        };

        vec![
            item("demo-budget-1", "Venue rental", BudgetCategory::Venue, 80_000.0, 85_000.0, 85_000.0, -20),
            item("demo-budget-2", "Catering", BudgetCategory::Catering, 120_000.0, 110_000.0, 30_000.0, 30),
            item("demo-budget-3", "Photographer", BudgetCategory::Photography, 35_000.0, 35_000.0, 0.0, 14),
            item("demo-budget-4", "Flowers", BudgetCategory::Flowers, 15_000.0, 0.0, 0.0, 60),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BudgetStats {
    pub total_budgeted: f64,
    pub total_actual: f64,
    pub total_paid: f64,
    /// Budgeted minus actual; negative when over budget.
    pub remaining: f64,
    pub budget_used_percent: f64,
    pub paid_percent: f64,
    pub pending_count: usize,
    pub paid_count: usize,
    pub overdue_count: usize,
    pub over_budget_count: usize,
}

impl BudgetStats {
    pub fn compute(items: &[Entity<BudgetItem>]) -> Self {
        let mut stats = Self::default();
        for item in items.iter().map(|entity| &entity.fields) {
            stats.total_budgeted += item.budgeted_amount;
            stats.total_actual += item.actual_amount;
            stats.total_paid += item.paid_amount;
            match item.payment_status {
                PaymentStatus::Pending | PaymentStatus::Partial => stats.pending_count += 1,
                PaymentStatus::Paid => stats.paid_count += 1,
                PaymentStatus::Overdue => stats.overdue_count += 1,
                PaymentStatus::Cancelled => {}
            }
            if item.is_over_budget() {
                stats.over_budget_count += 1;
            }
        }
        stats.remaining = stats.total_budgeted - stats.total_actual;
        if stats.total_budgeted > 0.0 {
            stats.budget_used_percent = stats.total_actual / stats.total_budgeted * 100.0;
        }
        if stats.total_actual > 0.0 {
            stats.paid_percent = stats.total_paid / stats.total_actual * 100.0;
        }
        stats
    }
}

impl SyncEngine<BudgetItem> {
    /// Appends a payment and recomputes the paid amount and payment status.
    pub async fn record_payment(
        &self,
        id: &str,
        amount: f64,
        method: Option<PaymentMethod>,
        note: Option<String>,
    ) -> Result<OperationResult<()>> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(SyncError::validation(format!(
                "Payment amount must be positive, got {}",
                amount
            )));
        }
        let Some(item) = self.get(id)? else {
            warn!("payment for budget item '{}' ignored: not found", id);
            return Ok(OperationResult::skipped(()));
        };

        let now = Utc::now();
        let mut payments = item.fields.payments.clone();
        payments.push(BudgetPayment {
            id: LocalIdGenerator::default().next("payment", now),
            amount,
            date: now,
            method,
            note,
        });
        let paid: f64 = payments.iter().map(|payment| payment.amount).sum();
        let status = PaymentStatus::derive(
            item.fields.payment_status,
            paid,
            item.fields.actual_amount,
            item.fields.due_date,
            now,
        );
        let paid_date = if status == PaymentStatus::Paid {
            Some(Some(now))
        } else {
            None
        };

        let patch = BudgetPatch {
            paid_amount: Some(paid),
            payment_status: Some(status),
            paid_date,
            payments: Some(payments),
            ..BudgetPatch::default()
        };
        self.update(id, patch).await
    }

    pub fn budget_stats(&self) -> Result<BudgetStats> {
        Ok(BudgetStats::compute(&self.entities()?))
    }

    pub fn items_by_category(&self, category: BudgetCategory) -> Result<Vec<Entity<BudgetItem>>> {
        self.get_filtered(|item| item.fields.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_amounts() {
        let now = Utc::now();
        let past = Some(now - Duration::days(1));
        assert_eq!(PaymentStatus::derive(PaymentStatus::Pending, 0.0, 100.0, None, now), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::derive(PaymentStatus::Pending, 40.0, 100.0, None, now), PaymentStatus::Partial);
        assert_eq!(PaymentStatus::derive(PaymentStatus::Partial, 100.0, 100.0, past, now), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::derive(PaymentStatus::Pending, 40.0, 100.0, past, now), PaymentStatus::Overdue);
        assert_eq!(PaymentStatus::derive(PaymentStatus::Cancelled, 100.0, 100.0, None, now), PaymentStatus::Cancelled);
    }

    #[test]
    fn drafts_are_validated() {
        assert!(BudgetItem::validate_draft(&BudgetDraft::new("Venue", BudgetCategory::Venue, 1000.0)).is_ok());
        assert!(BudgetItem::validate_draft(&BudgetDraft::new("Venue", BudgetCategory::Venue, -1.0)).is_err());
        assert!(BudgetItem::validate_draft(&BudgetDraft::new(" ", BudgetCategory::Venue, 1.0)).is_err());
        assert!(
            BudgetItem::validate_draft(&BudgetDraft::new("Venue", BudgetCategory::Venue, 1.0).currency("eur")).is_err()
        );
    }

    #[test]
    fn stats_over_fixtures() {
        let fixtures = BudgetItem::fixtures("demo", Utc::now());
        assert_eq!(fixtures.len(), 4);
        let stats = BudgetStats::compute(&fixtures);
        assert_eq!(stats.total_budgeted, 250_000.0);
        assert_eq!(stats.total_actual, 230_000.0);
        assert_eq!(stats.total_paid, 115_000.0);
        assert_eq!(stats.remaining, 20_000.0);
        assert_eq!(stats.paid_count, 1);
        assert_eq!(stats.over_budget_count, 1);
        assert_eq!(stats.paid_percent, 50.0);
    }

    #[test]
    fn remote_fields_use_camel_case() {
        let now = Utc::now();
        let item = Entity::new(
            "b1",
            "w1",
            BudgetItem::from_draft(BudgetDraft::new("Rings", BudgetCategory::Rings, 20_000.0), now),
            now,
        );
        let fields = BudgetItem::to_remote(&item).unwrap();
        assert_eq!(fields["budgetedAmount"], serde_json::json!(20_000.0));
        assert_eq!(fields["parentScopeId"], serde_json::json!("w1"));
        assert!(!fields.contains_key("id"));
        let back = BudgetItem::from_remote(crate::remote::RemoteDocument::new("b1", fields)).unwrap();
        assert_eq!(back, item);
    }
}
