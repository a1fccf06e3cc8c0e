use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    Protocol,
    MessageHandler,
    Transport,
    Visualization,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationType {
    None,
    Panel,
    Window,
}

/// Classification every communication component reports to the host application.
pub trait Plugin {
    fn name(&self) -> &str;
    fn plugin_type(&self) -> PluginType;
    fn visualization_type(&self) -> VisualizationType {
        VisualizationType::None
    }
}
