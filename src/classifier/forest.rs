use std::fs;
use std::path::Path;

use ndarray::prelude::*;
use serde::Deserialize;

use crate::errors::{PwatError, Result};
use crate::traits::CategoryClassifier;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

/// Random-forest style tree ensemble stored as JSON.
///
/// ```json
/// {"classes": [0, 1, 2], "n_features": 3,
///  "trees": [{"nodes": [{"feature": 0, "threshold": 0.5, "left": 1, "right": 2},
///                       {"value": [4, 1, 0]}, {"value": [0, 2, 3]}]}]}
/// ```
///
/// Node 0 is the root. Leaf values are per-class counts or probabilities and
/// are normalized before averaging across trees.
#[derive(Debug, Clone, Deserialize)]
pub struct ForestClassifier {
    classes: Vec<i64>,
    n_features: usize,
    trees: Vec<Tree>,
}

impl ForestClassifier {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PwatError::artifact(path, e))?;
        Self::from_json(&text).map_err(|e| match e {
            PwatError::Configuration { message } => PwatError::artifact(path, message),
            other => PwatError::artifact(path, other),
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let forest: Self = serde_json::from_str(text).map_err(|e| PwatError::Configuration {
            message: format!("invalid forest document: {e}"),
        })?;
        forest.validate()?;
        Ok(forest)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(PwatError::Configuration { message });
        if self.classes.is_empty() {
            return invalid("forest has no classes".to_string());
        }
        if self.trees.is_empty() {
            return invalid("forest has no trees".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return invalid(format!("tree {t} is empty"));
            }
            for (n, node) in tree.nodes.iter().enumerate() {
                match node {
                    Node::Split {
                        feature,
                        left,
                        right,
                        ..
                    } => {
                        if *feature >= self.n_features {
                            return invalid(format!(
                                "tree {t} node {n} splits on feature {feature} of {}",
                                self.n_features
                            ));
                        }
                        // children after parents: no cycles
                        let in_range = |child: usize| child > n && child < tree.nodes.len();
                        if !in_range(*left) || !in_range(*right) {
                            return invalid(format!("tree {t} node {n} has invalid children"));
                        }
                    }
                    Node::Leaf { value } => {
                        if value.len() != self.classes.len() {
                            return invalid(format!(
                                "tree {t} leaf {n} has {} values for {} classes",
                                value.len(),
                                self.classes.len()
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn leaf<'a>(&'a self, tree: &'a Tree, row: ArrayView1<f64>) -> &'a [f64] {
        let mut index = 0;
        loop {
            match &tree.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => index = if row[*feature] <= *threshold { *left } else { *right },
                Node::Leaf { value } => return value,
            }
        }
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> i64 {
        let mut votes = vec![0.0_f64; self.classes.len()];
        for tree in &self.trees {
            let leaf = self.leaf(tree, row);
            let total: f64 = leaf.iter().sum();
            if total > 0.0 {
                votes
                    .iter_mut()
                    .zip(leaf)
                    .for_each(|(vote, v)| *vote += v / total);
            }
        }
        // first maximum wins ties
        let best = votes
            .iter()
            .enumerate()
            .fold(0, |best, (i, v)| if *v > votes[best] { i } else { best });
        self.classes[best]
    }
}

impl CategoryClassifier for ForestClassifier {
    fn predict(&self, features: ArrayView2<f64>) -> Result<ArrayD<i64>> {
        if features.ncols() != self.n_features {
            return Err(PwatError::Validation {
                field: "features".to_string(),
                reason: format!(
                    "forest expects {} columns, got {}",
                    self.n_features,
                    features.ncols()
                ),
            });
        }
        let labels: Vec<i64> = features
            .outer_iter()
            .map(|row| self.predict_row(row))
            .collect();
        Ok(Array1::from(labels).into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUMPS: &str = r#"{
        "classes": [1, 2, 3],
        "n_features": 2,
        "trees": [
            {"nodes": [
                {"feature": 0, "threshold": 0.5, "left": 1, "right": 2},
                {"value": [10, 0, 0]},
                {"value": [0, 3, 1]}
            ]},
            {"nodes": [
                {"feature": 1, "threshold": 10.0, "left": 1, "right": 2},
                {"value": [0.2, 0.8, 0.0]},
                {"value": [0.0, 0.0, 1.0]}
            ]}
        ]
    }"#;

    #[test]
    fn averages_normalized_leaves() -> Result<()> {
        let forest = ForestClassifier::from_json(STUMPS)?;
        let rows = array![[0.5, 3.0], [0.9, 3.0], [0.9, 20.0], [0.1, 20.0]];
        let labels = forest.predict(rows.view())?;
        // votes: [1.2, 0.8, 0], [0.2, 1.55, 0.25], [0, 0.75, 1.25], [1, 0, 1]
        assert_eq!(labels, array![1_i64, 2, 3, 1].into_dyn());
        Ok(())
    }

    #[test]
    fn rejects_wrong_row_width() -> Result<()> {
        let forest = ForestClassifier::from_json(STUMPS)?;
        assert!(forest.predict(Array2::zeros((1, 3)).view()).is_err());
        Ok(())
    }

    #[test]
    fn validation_catches_bad_documents() {
        let out_of_range = r#"{"classes": [0], "n_features": 1, "trees": [{"nodes": [
            {"feature": 4, "threshold": 0.0, "left": 1, "right": 2},
            {"value": [1]}, {"value": [1]}]}]}"#;
        let cyclic = r#"{"classes": [0], "n_features": 1, "trees": [{"nodes": [
            {"feature": 0, "threshold": 0.0, "left": 0, "right": 1},
            {"value": [1]}]}]}"#;
        let leaf_width = r#"{"classes": [0, 1], "n_features": 1, "trees": [{"nodes": [
            {"value": [1]}]}]}"#;
        for doc in [out_of_range, cyclic, leaf_width, "{}", "[]"] {
            assert!(ForestClassifier::from_json(doc).is_err(), "{doc}");
        }
    }

    #[test]
    fn load_error_names_the_file() {
        let err = ForestClassifier::load(Path::new("modelos/Categoria3.json")).unwrap_err();
        assert!(matches!(err, PwatError::ArtifactLoad { .. }));
        assert!(err.to_string().contains("Categoria3.json"));
    }
}
