//! Routes one feature row through the six category classifiers.

mod forest;
mod onnx;

use std::collections::BTreeMap;

use ndarray::prelude::*;
use serde_json::{Map, Value};

use crate::category::Category;
use crate::errors::{PwatError, Result};
use crate::traits::CategoryClassifier;

pub use forest::ForestClassifier;
pub use onnx::OnnxClassifier;

/// Result of one classifier on one row.
#[derive(Debug)]
pub enum CategoryOutcome {
    Scored(i64),
    Failed(PwatError),
}

impl CategoryOutcome {
    pub fn score(&self) -> Option<i64> {
        match self {
            Self::Scored(score) => Some(*score),
            Self::Failed(_) => None,
        }
    }
}

/// Every category's outcome, in positional order.
#[derive(Debug, Default)]
pub struct ClassificationReport {
    outcomes: Vec<(Category, CategoryOutcome)>,
}

impl ClassificationReport {
    pub fn outcomes(&self) -> &[(Category, CategoryOutcome)] {
        &self.outcomes
    }

    /// Successful scores only.
    pub fn scores(&self) -> BTreeMap<Category, i64> {
        self.outcomes
            .iter()
            .filter_map(|(category, outcome)| outcome.score().map(|score| (*category, score)))
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (Category, &PwatError)> {
        self.outcomes.iter().filter_map(|(category, outcome)| match outcome {
            CategoryOutcome::Failed(err) => Some((*category, err)),
            CategoryOutcome::Scored(_) => None,
        })
    }

    /// `{"Cat3": 3, ...}` with failed categories left out.
    pub fn to_json(&self) -> Value {
        let object: Map<String, Value> = self
            .scores()
            .into_iter()
            .map(|(category, score)| (category.label().to_string(), Value::from(score)))
            .collect();
        Value::Object(object)
    }
}

/// Runs every classifier on `row`. A failing classifier is logged and
/// recorded; the remaining ones still run.
pub fn classify_all(
    classifiers: &[(Category, Box<dyn CategoryClassifier>)],
    row: ArrayView2<f64>,
) -> ClassificationReport {
    let outcomes = classifiers
        .iter()
        .map(|(category, classifier)| {
            let outcome = match classify_one(*category, classifier.as_ref(), row) {
                Ok(score) => {
                    tracing::debug!(category = %category, score, "category scored");
                    CategoryOutcome::Scored(score)
                }
                Err(err) => {
                    tracing::error!(category = %category, error = %err, "classifier failed");
                    CategoryOutcome::Failed(err)
                }
            };
            (*category, outcome)
        })
        .collect();
    ClassificationReport { outcomes }
}

fn classify_one(
    category: Category,
    classifier: &dyn CategoryClassifier,
    row: ArrayView2<f64>,
) -> Result<i64> {
    let labels = classifier.predict(row).map_err(|e| match e {
        err @ PwatError::Classifier { .. } => err,
        other => PwatError::Classifier {
            category,
            message: other.to_string(),
        },
    })?;
    labels.iter().next().copied().ok_or(PwatError::Classifier {
        category,
        message: "classifier returned no label".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{FailingClassifier, FixedClassifier};

    fn fixed_six() -> Vec<(Category, Box<dyn CategoryClassifier>)> {
        Category::ALL
            .iter()
            .map(|&c| {
                (
                    c,
                    Box::new(FixedClassifier::new(i64::from(c.number()))) as Box<dyn CategoryClassifier>,
                )
            })
            .collect()
    }

    #[test]
    fn every_category_is_scored_in_order() {
        let row = Array2::<f64>::zeros((1, 4));
        let report = classify_all(&fixed_six(), row.view());

        let scores = report.scores();
        assert_eq!(scores.len(), 6);
        for category in Category::ALL {
            assert_eq!(scores[&category], i64::from(category.number()));
        }
        assert_eq!(
            report.to_json(),
            serde_json::json!({"Cat3": 3, "Cat4": 4, "Cat5": 5, "Cat6": 6, "Cat7": 7, "Cat8": 8})
        );
    }

    #[test]
    fn failure_is_isolated_to_its_category() {
        let mut classifiers = fixed_six();
        classifiers[2].1 = Box::new(FailingClassifier::new("input width mismatch"));
        let report = classify_all(&classifiers, Array2::<f64>::zeros((1, 4)).view());

        let scores = report.scores();
        assert_eq!(scores.len(), 5);
        assert!(!scores.contains_key(&Category::Cat5));
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Category::Cat5);
        assert!(matches!(
            failures[0].1,
            PwatError::Classifier { category: Category::Cat5, .. }
        ));
        assert!(report.to_json().get("Cat5").is_none());
    }

    #[test]
    fn first_label_is_taken() -> Result<()> {
        struct Many;
        impl CategoryClassifier for Many {
            fn predict(&self, _features: ArrayView2<f64>) -> Result<ArrayD<i64>> {
                Ok(array![2_i64, 9, 9].into_dyn())
            }
        }
        assert_eq!(classify_one(Category::Cat4, &Many, Array2::zeros((1, 1)).view())?, 2);
        Ok(())
    }

    #[test]
    fn empty_output_is_a_failure() {
        struct Nothing;
        impl CategoryClassifier for Nothing {
            fn predict(&self, _features: ArrayView2<f64>) -> Result<ArrayD<i64>> {
                Ok(ArrayD::zeros(IxDyn(&[0])))
            }
        }
        let report = classify_all(
            &[(Category::Cat8, Box::new(Nothing) as Box<dyn CategoryClassifier>)],
            Array2::zeros((1, 1)).view(),
        );
        assert!(report.scores().is_empty());
        assert_eq!(report.failures().count(), 1);
    }
}
