// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Template service: validation and version-on-diff creation.

use std::sync::Arc;

use tracing::info;

use crate::error::CoreError;
use crate::models::{Template, TemplateList};
use crate::store::{GetTemplateArgs, ListArgs, StateStore};

/// Validates templates and assigns versions. Templates are immutable: a
/// semantically different submission under an existing name creates the next
/// version instead of mutating a row.
#[derive(Clone)]
pub struct TemplateService {
    store: Arc<dyn StateStore>,
}

impl TemplateService {
    /// Create the service.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Fetch one template by id or `(name[, version])`.
    pub async fn get_template(&self, args: &GetTemplateArgs) -> Result<Template, CoreError> {
        self.store.get_template(args).await
    }

    /// List templates.
    pub async fn list_templates(&self, args: &ListArgs) -> Result<TemplateList, CoreError> {
        self.store.list_templates(args).await
    }

    /// Create a template, versioning on diff.
    ///
    /// Returns `(template, created)` where `created` is true iff a new row
    /// was written. An identical (per diff) resubmission returns the
    /// existing row unchanged.
    pub async fn create_template(
        &self,
        mut template: Template,
    ) -> Result<(Template, bool), CoreError> {
        let reasons = template.validation_errors();
        if !reasons.is_empty() {
            return Err(CoreError::MalformedInput(format!(
                "validation failed, reasons: [{}]",
                reasons.join("\n")
            )));
        }

        let mut args = ListArgs {
            limit: Some(1),
            sort_by: Some("version".to_string()),
            order: Some("desc".to_string()),
            ..Default::default()
        };
        args.add_filter("template_name", &template.template_name);
        let existing = self.store.list_templates(&args).await?;

        match existing.templates.into_iter().next() {
            None => {
                template.version = 1;
                let created = self.store.create_template(template).await?;
                info!(
                    template_name = %created.template_name,
                    template_id = %created.template_id,
                    "Created template at version 1"
                );
                Ok((created, true))
            }
            Some(newest) => {
                if template.differs_from(&newest) {
                    template.version = newest.version + 1;
                    let created = self.store.create_template(template).await?;
                    info!(
                        template_name = %created.template_name,
                        version = created.version,
                        "Created new template version"
                    );
                    Ok((created, false))
                } else {
                    Ok((newest, false))
                }
            }
        }
    }
}
