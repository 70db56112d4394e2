use std::fmt;

use serde::Serialize;

/// PWAT sub-score handled by one tabular classifier.
///
/// The declaration order is the positional pairing with the classifier
/// artifacts: `Cat3` is the first artifact, `Cat8` the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Category {
    Cat3,
    Cat4,
    Cat5,
    Cat6,
    Cat7,
    Cat8,
}

/// On-disk encoding of a classifier artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// serde JSON tree ensemble
    Forest,
    /// ONNX ML graph
    Onnx,
}

impl ArtifactFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Forest => "json",
            Self::Onnx => "onnx",
        }
    }
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Cat3,
        Category::Cat4,
        Category::Cat5,
        Category::Cat6,
        Category::Cat7,
        Category::Cat8,
    ];

    pub const fn number(self) -> u8 {
        match self {
            Self::Cat3 => 3,
            Self::Cat4 => 4,
            Self::Cat5 => 5,
            Self::Cat6 => 6,
            Self::Cat7 => 7,
            Self::Cat8 => 8,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Cat3 => "Cat3",
            Self::Cat4 => "Cat4",
            Self::Cat5 => "Cat5",
            Self::Cat6 => "Cat6",
            Self::Cat7 => "Cat7",
            Self::Cat8 => "Cat8",
        }
    }

    /// Serialization format of this category's artifact. Fixed per category.
    pub const fn artifact_format(self) -> ArtifactFormat {
        match self {
            Self::Cat3 | Self::Cat6 => ArtifactFormat::Forest,
            Self::Cat4 | Self::Cat5 | Self::Cat7 | Self::Cat8 => ArtifactFormat::Onnx,
        }
    }

    pub fn artifact_file_name(self) -> String {
        format!(
            "Categoria{}.{}",
            self.number(),
            self.artifact_format().extension()
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_follow_fixed_formats() {
        let names: Vec<_> = Category::ALL
            .iter()
            .map(|c| c.artifact_file_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "Categoria3.json",
                "Categoria4.onnx",
                "Categoria5.onnx",
                "Categoria6.json",
                "Categoria7.onnx",
                "Categoria8.onnx",
            ]
        );
    }

    #[test]
    fn serializes_as_label() {
        assert_eq!(serde_json::to_string(&Category::Cat7).unwrap(), "\"Cat7\"");
    }
}
