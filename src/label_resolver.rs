//! Create-or-get resolution of the label that marks handled messages
use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::models::{LabelResolution, LabelVisibility};
use tracing::{debug, info};

/// Ensures a named label exists and reports its id
pub struct LabelResolver<C> {
    client: C,
    visibility: LabelVisibility,
}

impl<C: GmailClient> LabelResolver<C> {
    pub fn new(client: C, visibility: LabelVisibility) -> Self {
        Self { client, visibility }
    }

    /// Create the label, or find it when the name is already taken
    ///
    /// A conflict on create falls back to an exact-name lookup among the
    /// existing labels. Any other create failure is returned unchanged.
    pub async fn resolve_label(&self, name: &str) -> Result<LabelResolution> {
        match self.client.create_label(name, &self.visibility).await {
            Ok(id) => {
                info!("Created label '{}' with ID: {}", name, id);
                Ok(LabelResolution::Created(id))
            }
            Err(e) if e.is_conflict() => {
                debug!("Label '{}' already exists, looking it up", name);
                let id = self.find_label_id(name).await?;
                info!("Found existing label '{}' with ID: {}", name, id);
                Ok(LabelResolution::Found(id))
            }
            Err(e) => Err(e),
        }
    }

    async fn find_label_id(&self, name: &str) -> Result<String> {
        self.client
            .list_labels()
            .await?
            .into_iter()
            .find(|label| label.name == name)
            .map(|label| label.id)
            .ok_or_else(|| {
                GmailError::LabelError(format!(
                    "Label '{}' reported as existing but not found in label list",
                    name
                ))
            })
    }
}
