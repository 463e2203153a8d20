//! Environment load and save

use tracing::debug;

use crate::errors::ControllerError;
use crate::inventory::generator;
use crate::inventory::models::Environment;
use crate::storage::layout::StateLayout;

/// Load an environment's config document.
pub async fn load_environment(
    layout: &StateLayout,
    environment: &str,
) -> Result<Environment, ControllerError> {
    let file = layout.config_file(environment);
    if !file.exists().await {
        return Err(ControllerError::Inventory(format!(
            "no environment config at {}",
            file.path().display()
        )));
    }

    let contents = file.read_string().await?;
    let environment: Environment = serde_yaml::from_str(&contents)?;
    debug!(
        "loaded environment {} with {} targets",
        environment.name,
        environment.targets.len()
    );
    Ok(environment)
}

/// Save an environment: the config document plus the rendered hosts inventory.
pub async fn save_environment(
    layout: &StateLayout,
    environment: &Environment,
) -> Result<(), ControllerError> {
    layout.setup(&environment.name).await?;

    let config_doc = serde_yaml::to_string(environment)?;
    layout
        .config_file(&environment.name)
        .write_string(&config_doc)
        .await?;

    let hosts_doc = generator::render_hosts(environment)?;
    layout
        .hosts_file(&environment.name)
        .write_string(&hosts_doc)
        .await?;

    Ok(())
}
