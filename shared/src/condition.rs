use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("class index {0} is outside the label table (0..6)")]
    OutOfRange(i64),
}

/// Conditions the fundus classifier can report, in output-neuron order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
pub enum Condition {
    #[serde(rename = "AMD")]
    #[strum(serialize = "AMD")]
    Amd,
    Cataract,
    Glaucoma,
    Myopia,
    #[serde(rename = "Non-eye")]
    #[strum(serialize = "Non-eye")]
    NonEye,
    Normal,
}

const TABLE: [Condition; Condition::COUNT] = [
    Condition::Amd,
    Condition::Cataract,
    Condition::Glaucoma,
    Condition::Myopia,
    Condition::NonEye,
    Condition::Normal,
];

impl Condition {
    pub const COUNT: usize = 6;

    /// All conditions in index order.
    pub fn all() -> impl Iterator<Item = Condition> {
        TABLE.iter().copied()
    }

    pub fn from_index(index: i64) -> Result<Self, LabelError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| TABLE.get(i).copied())
            .ok_or(LabelError::OutOfRange(index))
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Condition::Amd => "AMD",
            Condition::Cataract => "Cataract",
            Condition::Glaucoma => "Glaucoma",
            Condition::Myopia => "Myopia",
            Condition::NonEye => "Non-eye",
            Condition::Normal => "Normal",
        }
    }

    /// Long form used on the API index page.
    pub fn summary(self) -> &'static str {
        match self {
            Condition::Amd => "AMD (Age-related Macular Degeneration)",
            other => other.name(),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Condition::Amd => {
                "Age-related macular degeneration (AMD) is an eye disease that can blur your central vision. \
                 It happens when aging causes damage to the macula, the part of the eye that controls sharp, \
                 straight-ahead vision."
            }
            Condition::Cataract => {
                "A cataract is a cloudy area in the eye's lens that can cause vision loss. Cataracts are caused \
                 by a breakdown of the lens's protein, which clumps together and makes the lens cloudy."
            }
            Condition::Glaucoma => {
                "Glaucoma is a group of eye diseases that can damage the optic nerve, which transmits visual \
                 information from the eye to the brain. This damage can lead to vision loss and blindness if \
                 left untreated."
            }
            Condition::Myopia => {
                "Myopia, also known as nearsightedness or short-sightedness, is a common eye disease that makes \
                 it difficult to see far away. It occurs when light from distant objects focuses in front of the \
                 retina instead of on it."
            }
            Condition::NonEye => "No eye was detected in this image",
            Condition::Normal => "This is a healthy eye image",
        }
    }
}
