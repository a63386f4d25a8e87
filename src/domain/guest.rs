use crate::core::{Entity, EntityKind, Result, SyncError, Timestamp};
use crate::sync::{OperationResult, SyncEngine};
use chrono::{Duration, Utc};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type GuestEngine = SyncEngine<Guest>;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RsvpStatus {
    #[default]
    Pending,
    Attending,
    Declined,
    Maybe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuestCategory {
    FamilyBride,
    FamilyGroom,
    FriendsBride,
    FriendsGroom,
    ColleaguesBride,
    ColleaguesGroom,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvitationType {
    #[default]
    CeremonyReception,
    CeremonyOnly,
    ReceptionOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub category: GuestCategory,
    #[serde(default)]
    pub invitation_type: InvitationType,
    #[serde(default)]
    pub rsvp_status: RsvpStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsvp_date: Option<Timestamp>,
    #[serde(default)]
    pub has_plus_one: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plus_one_name: Option<String>,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub invitation_sent: bool,
}

impl Guest {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuestDraft {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub category: GuestCategory,
    pub invitation_type: InvitationType,
    pub has_plus_one: bool,
    pub plus_one_name: Option<String>,
    pub dietary_restrictions: Vec<String>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
}

impl GuestDraft {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Self::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn category(mut self, category: GuestCategory) -> Self {
        self.category = category;
        self
    }

    pub fn plus_one(mut self, name: impl Into<String>) -> Self {
        self.has_plus_one = true;
        self.plus_one_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<GuestCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation_type: Option<InvitationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsvp_status: Option<RsvpStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsvp_date: Option<Option<Timestamp>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_plus_one: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plus_one_name: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation_sent: Option<bool>,
}

fn check_name(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SyncError::validation(format!("Guest {} is required", field)));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<()> {
    if !EMAIL.is_match(email.trim()) {
        return Err(SyncError::validation(format!("Invalid guest email '{}'", email)));
    }
    Ok(())
}

impl EntityKind for Guest {
    type Draft = GuestDraft;
    type Patch = GuestPatch;

    const KIND: &'static str = "guests";
    const ID_PREFIX: &'static str = "guest";

    fn validate_draft(draft: &GuestDraft) -> Result<()> {
        check_name(&draft.first_name, "first name")?;
        check_name(&draft.last_name, "last name")?;
        if let Some(email) = &draft.email {
            check_email(email)?;
        }
        Ok(())
    }

    fn from_draft(draft: GuestDraft, _now: Timestamp) -> Self {
        Self {
            first_name: draft.first_name.trim().to_string(),
            last_name: draft.last_name.trim().to_string(),
            email: draft.email.map(|email| email.trim().to_string()),
            phone: draft.phone,
            category: draft.category,
            invitation_type: draft.invitation_type,
            rsvp_status: RsvpStatus::Pending,
            rsvp_date: None,
            has_plus_one: draft.has_plus_one,
            plus_one_name: draft.plus_one_name,
            dietary_restrictions: draft.dietary_restrictions,
            notes: draft.notes,
            tags: draft.tags,
            invitation_sent: false,
        }
    }

    fn validate_patch(patch: &GuestPatch) -> Result<()> {
        if let Some(first_name) = &patch.first_name {
            check_name(first_name, "first name")?;
        }
        if let Some(last_name) = &patch.last_name {
            check_name(last_name, "last name")?;
        }
        if let Some(Some(email)) = &patch.email {
            check_email(email)?;
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: &GuestPatch, _now: Timestamp) {
        if let Some(first_name) = &patch.first_name {
            self.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = &patch.last_name {
            self.last_name = last_name.trim().to_string();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
        if let Some(phone) = &patch.phone {
            self.phone = phone.clone();
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(invitation_type) = patch.invitation_type {
            self.invitation_type = invitation_type;
        }
        if let Some(rsvp_status) = patch.rsvp_status {
            self.rsvp_status = rsvp_status;
        }
        if let Some(rsvp_date) = patch.rsvp_date {
            self.rsvp_date = rsvp_date;
        }
        if let Some(has_plus_one) = patch.has_plus_one {
            self.has_plus_one = has_plus_one;
        }
        if let Some(plus_one_name) = &patch.plus_one_name {
            self.plus_one_name = plus_one_name.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(invitation_sent) = patch.invitation_sent {
            self.invitation_sent = invitation_sent;
        }
    }

    fn initial_sort_order(_fields: &Self, existing: &[Entity<Self>]) -> Option<i64> {
        Some(existing.len() as i64)
    }

    fn fixtures(scope_id: &str, now: Timestamp) -> Vec<Entity<Self>> {
        let guest = |first: &str,
                     last: &str,
                     category: GuestCategory,
                     rsvp_status: RsvpStatus,
                     plus_one: Option<&str>| Guest {
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: Some(format!(
                "{}.{}@example.com",
                first.to_lowercase(),
                last.to_lowercase()
            )),
            phone: None,
            category,
            invitation_type: InvitationType::CeremonyReception,
            rsvp_status,
            rsvp_date: (rsvp_status != RsvpStatus::Pending).then(|| now - Duration::days(3)),
            has_plus_one: plus_one.is_some(),
            plus_one_name: plus_one.map(str::to_string),
            dietary_restrictions: Vec::new(),
            notes: None,
            tags: Vec::new(),
            invitation_sent: true,
        };

        let created = now - Duration::days(30);
        [
            guest("Jana", "Novakova", GuestCategory::FamilyBride, RsvpStatus::Attending, Some("Petr Novak")),
            guest("Martin", "Svoboda", GuestCategory::FriendsGroom, RsvpStatus::Pending, None),
            guest("Eva", "Dvorakova", GuestCategory::ColleaguesBride, RsvpStatus::Declined, None),
            guest("Tomas", "Cerny", GuestCategory::FamilyGroom, RsvpStatus::Maybe, Some("Lucie Cerna")),
        ]
        .into_iter()
        .enumerate()
        .map(|(index, fields)| {
            Entity::new(format!("demo-guest-{}", index + 1), scope_id, fields, created)
                .with_sort_order(Some(index as i64))
        })
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuestFilters {
    /// Case-insensitive match on name or email.
    pub search: Option<String>,
    pub category: Vec<GuestCategory>,
    pub rsvp_status: Vec<RsvpStatus>,
    pub invitation_type: Vec<InvitationType>,
    pub has_plus_one: Option<bool>,
    pub invitation_sent: Option<bool>,
    pub tags: Vec<String>,
}

impl GuestFilters {
    pub fn matches(&self, guest: &Guest) -> bool {
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let in_name = guest.full_name().to_lowercase().contains(&needle);
            let in_email = guest
                .email
                .as_ref()
                .is_some_and(|email| email.to_lowercase().contains(&needle));
            if !in_name && !in_email {
                return false;
            }
        }
        if !self.category.is_empty() && !self.category.contains(&guest.category) {
            return false;
        }
        if !self.rsvp_status.is_empty() && !self.rsvp_status.contains(&guest.rsvp_status) {
            return false;
        }
        if !self.invitation_type.is_empty() && !self.invitation_type.contains(&guest.invitation_type) {
            return false;
        }
        if self.has_plus_one.is_some_and(|wanted| guest.has_plus_one != wanted) {
            return false;
        }
        if self.invitation_sent.is_some_and(|wanted| guest.invitation_sent != wanted) {
            return false;
        }
        self.tags.iter().all(|tag| guest.tags.contains(tag))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestStats {
    pub total: usize,
    pub invited: usize,
    pub attending: usize,
    pub declined: usize,
    pub pending: usize,
    pub maybe: usize,
    pub plus_ones: usize,
    pub plus_ones_attending: usize,
    pub total_with_plus_ones: usize,
    pub ceremony_only: usize,
    pub reception_only: usize,
    pub ceremony_and_reception: usize,
    pub dietary_restrictions: BTreeMap<String, usize>,
}

impl GuestStats {
    pub fn compute(guests: &[Entity<Guest>]) -> Self {
        let mut stats = Self {
            total: guests.len(),
            ..Self::default()
        };
        for guest in guests.iter().map(|entity| &entity.fields) {
            if guest.invitation_sent {
                stats.invited += 1;
            }
            match guest.rsvp_status {
                RsvpStatus::Attending => stats.attending += 1,
                RsvpStatus::Declined => stats.declined += 1,
                RsvpStatus::Pending => stats.pending += 1,
                RsvpStatus::Maybe => stats.maybe += 1,
            }
            if guest.has_plus_one {
                stats.plus_ones += 1;
                if guest.rsvp_status == RsvpStatus::Attending {
                    stats.plus_ones_attending += 1;
                }
            }
            match guest.invitation_type {
                InvitationType::CeremonyOnly => stats.ceremony_only += 1,
                InvitationType::ReceptionOnly => stats.reception_only += 1,
                InvitationType::CeremonyReception => stats.ceremony_and_reception += 1,
            }
            for restriction in &guest.dietary_restrictions {
                *stats
                    .dietary_restrictions
                    .entry(restriction.clone())
                    .or_default() += 1;
            }
        }
        stats.total_with_plus_ones = stats.total + stats.plus_ones;
        stats
    }
}

impl SyncEngine<Guest> {
    /// Records a guest's answer and stamps `rsvpDate`.
    pub async fn update_rsvp(&self, id: &str, status: RsvpStatus) -> Result<OperationResult<()>> {
        if self.get(id)?.is_none() {
            warn!("rsvp of guest '{}' ignored: not found", id);
            return Ok(OperationResult::skipped(()));
        }
        let patch = GuestPatch {
            rsvp_status: Some(status),
            rsvp_date: Some(Some(Utc::now())),
            ..GuestPatch::default()
        };
        self.update(id, patch).await
    }

    pub fn filtered_guests(&self, filters: &GuestFilters) -> Result<Vec<Entity<Guest>>> {
        self.get_filtered(|guest| filters.matches(&guest.fields))
    }

    pub fn guest_stats(&self) -> Result<GuestStats> {
        Ok(GuestStats::compute(&self.entities()?))
    }
}
