// src/engine/locks.rs

use std::collections::BTreeMap;

use tracing::debug;

use crate::graph::{ExecutionPlan, TransactionId};

/// Named mutual-exclusion tokens from `resource_lock` edges.
///
/// One global lock per token string. The table only tracks holders; waiting
/// transactions stay in the runtime's pending set, and the dispatch pump
/// re-attempts acquisition for them in wave/priority order after every
/// release. Acquisition is all-or-nothing across every token a transaction
/// participates in, which rules out deadlock between transactions needing
/// overlapping token sets.
#[derive(Debug, Default)]
pub struct LockTable {
    holders: BTreeMap<String, Option<TransactionId>>,
    needs: BTreeMap<TransactionId, Vec<String>>,
}

impl LockTable {
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let mut holders = BTreeMap::new();
        let mut needs: BTreeMap<TransactionId, Vec<String>> = BTreeMap::new();

        for (token, participants) in &plan.resource_locks {
            holders.insert(token.clone(), None);
            for id in participants {
                needs.entry(id.clone()).or_default().push(token.clone());
            }
        }
        // Token lists stay sorted (BTreeMap iteration) so acquisition order
        // is stable.
        Self { holders, needs }
    }

    /// Tokens a transaction must hold before dispatch.
    pub fn required(&self, id: &str) -> &[String] {
        self.needs.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Try to take every token `id` needs.
    ///
    /// On contention nothing is taken; the caller retries on a later
    /// dispatch pass.
    pub fn try_acquire(&mut self, id: &str) -> bool {
        let tokens = self.required(id).to_vec();
        if tokens.is_empty() {
            return true;
        }

        let blocked = tokens.iter().any(|t| {
            self.holders
                .get(t)
                .and_then(|h| h.as_deref())
                .map(|holder| holder != id)
                .unwrap_or(false)
        });
        if blocked {
            debug!(transaction = %id, "resource lock contention; dispatch deferred");
            return false;
        }

        for token in &tokens {
            if let Some(holder) = self.holders.get_mut(token) {
                *holder = Some(id.to_string());
            }
        }
        true
    }

    /// Release everything held by `id`.
    pub fn release(&mut self, id: &str) {
        for holder in self.holders.values_mut() {
            if holder.as_deref() == Some(id) {
                *holder = None;
            }
        }
    }

    /// Tokens currently held by `id`, for audit records.
    pub fn held_by(&self, id: &str) -> Vec<String> {
        self.holders
            .iter()
            .filter(|(_, h)| h.as_deref() == Some(id))
            .map(|(t, _)| t.clone())
            .collect()
    }
}
