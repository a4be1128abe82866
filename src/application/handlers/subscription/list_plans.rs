//! ListPlansHandler - Query handler for the plan catalog.

use std::sync::Arc;

use crate::domain::subscription::{PlanCatalog, PlanDescriptor};

#[derive(Debug, Clone, Default)]
pub struct ListPlansQuery;

#[derive(Debug, Clone)]
pub struct ListPlansResult {
    pub plans: Vec<PlanDescriptor>,
}

pub struct ListPlansHandler {
    catalog: Arc<PlanCatalog>,
}

impl ListPlansHandler {
    pub fn new(catalog: Arc<PlanCatalog>) -> Self {
        Self { catalog }
    }

    pub fn handle(&self, _query: ListPlansQuery) -> ListPlansResult {
        ListPlansResult {
            plans: self.catalog.plans().cloned().collect(),
        }
    }
}
