use serde::{Deserialize, Serialize};

/// One row of the fixed trial template shared by every participant.
///
/// `index` is the 1-based position assigned upstream and is what score lookups
/// are keyed on; traversal works on the item's position in the template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub index: u32,
    pub slide: u32,
    pub trial: u32,
    pub task: String,
    pub item: String,
    #[serde(default)]
    pub item_order_in_trial: u32,
    #[serde(default)]
    pub item_order_in_slide: u32,
}
