//! Target computation for one group synchronization.
//!
//! The group's variants share one physical pool, so every member must report
//! the same availability: the triggering variant's new quantity wins for the
//! whole group. Members already at that quantity are left alone.

use crate::models::{InventoryLevel, Quantity, VariantRef};

/// One write the engine must apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite {
    pub variant: VariantRef,
    pub quantity: Quantity,
}

/// Writes for a group plus the members that were already in sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub target: Quantity,
    pub writes: Vec<PlannedWrite>,
    pub unchanged: Vec<VariantRef>,
}

/// Compute the writes bringing every member of a group to `new_quantity`.
///
/// `levels` are the freshly read levels of the group members found on the
/// platform, normally including the trigger. A group whose only member is the
/// trigger always gets one confirming write, even when nothing changed.
pub fn plan(trigger: &VariantRef, new_quantity: Quantity, levels: &[InventoryLevel]) -> SyncPlan {
    let only_trigger = levels
        .iter()
        .all(|level| level.variant.variant_id == trigger.variant_id);

    if only_trigger {
        return SyncPlan {
            target: new_quantity,
            writes: vec![PlannedWrite {
                variant: trigger.clone(),
                quantity: new_quantity,
            }],
            unchanged: Vec::new(),
        };
    }

    let mut writes = Vec::new();
    let mut unchanged = Vec::new();

    for level in levels {
        if level.quantity == new_quantity {
            unchanged.push(level.variant.clone());
        } else {
            writes.push(PlannedWrite {
                variant: level.variant.clone(),
                quantity: new_quantity,
            });
        }
    }

    SyncPlan {
        target: new_quantity,
        writes,
        unchanged,
    }
}
