//! Production checklists (raw material, PPS, production) and QC reports.
//!
//! Checklists are replaced wholesale on every write; the audit trail keeps
//! the whole list before and after.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use inflow_core::{Attachment, ChecklistItemId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistKind {
    RawMaterial,
    Pps,
    Production,
}

impl ChecklistKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChecklistKind::RawMaterial => "raw_materials",
            ChecklistKind::Pps => "pps",
            ChecklistKind::Production => "production",
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: ChecklistItemId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ChecklistStatus,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Replaces the item with the same id, or appends it.
pub fn upsert(list: &[ChecklistItem], item: ChecklistItem) -> Vec<ChecklistItem> {
    let mut next = list.to_vec();
    match next.iter_mut().find(|existing| existing.id == item.id) {
        Some(existing) => *existing = item,
        None => next.push(item),
    }
    next
}

/// Approves the listed items, or every item when `ids` is empty.
///
/// Returns `None` when nothing changed.
pub fn approve(
    list: &[ChecklistItem],
    ids: &[ChecklistItemId],
    at: DateTime<Utc>,
) -> Option<Vec<ChecklistItem>> {
    let mut changed = false;
    let next = list
        .iter()
        .map(|item| {
            let selected = ids.is_empty() || ids.contains(&item.id);
            if selected && item.status != ChecklistStatus::Approved {
                changed = true;
                ChecklistItem {
                    status: ChecklistStatus::Approved,
                    updated_at: Some(at),
                    ..item.clone()
                }
            } else {
                item.clone()
            }
        })
        .collect();
    changed.then_some(next)
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcReport {
    pub id: ChecklistItemId,
    pub status: QcStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}
