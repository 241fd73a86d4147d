use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PredictError;
use crate::features::FeatureSchema;

pub const CLASS_COUNT: usize = 3;

pub const FEATURES_FILE: &str = "features.json";
pub const CLASSIFIER_FILE: &str = "classifier.json";
pub const HOME_REGRESSOR_FILE: &str = "regressor_home.json";
pub const AWAY_REGRESSOR_FILE: &str = "regressor_away.json";
pub const SCALER_FILE: &str = "scaler.json";

const MIN_SCALE: f64 = 1e-12;

/// Three-way outcome model. Rows come out in `[away_win, draw, home_win]` order.
pub trait OutcomeClassifier: Send + Sync {
    fn n_features(&self) -> usize;
    fn predict_proba(&self, row: &[f64]) -> [f64; CLASS_COUNT];
}

pub trait GoalRegressor: Send + Sync {
    fn n_features(&self) -> usize;
    fn predict(&self, row: &[f64]) -> f64;
}

pub trait FeatureScaler: Send + Sync {
    fn n_features(&self) -> usize;
    fn transform(&self, row: &[f64]) -> Vec<f64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn validate(&self) -> Result<()> {
        if self.mean.len() != self.scale.len() {
            bail!(
                "scaler has {} means but {} scales",
                self.mean.len(),
                self.scale.len()
            );
        }
        Ok(())
    }
}

impl FeatureScaler for StandardScaler {
    fn n_features(&self) -> usize {
        self.mean.len()
    }

    fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                let s = if scale.abs() <= MIN_SCALE { 1.0 } else { *scale };
                (x - mean) / s
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Flat node array rooted at index 0; children always sit after their parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("tree has no nodes");
        }
        let len = self.nodes.len();
        for (idx, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= n_features {
                    bail!("node {idx} splits on feature {feature} of {n_features}");
                }
                for child in [*left, *right] {
                    if child <= idx || child >= len {
                        bail!("node {idx} points at invalid child {child}");
                    }
                }
            }
        }
        Ok(())
    }

    /// `x <= threshold` goes left; NaN and infinities go right.
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        for _ in 0..self.nodes.len() {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = row.get(*feature).copied().unwrap_or(f64::NAN);
                    idx = if x.is_finite() && x <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => break,
            }
        }
        0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftmaxClassifier {
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedTreesClassifier {
    pub n_features: usize,
    pub base_score: Vec<f64>,
    /// One ensemble per class, in class order.
    pub trees: Vec<Vec<DecisionTree>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierModel {
    Softmax(SoftmaxClassifier),
    BoostedTrees(BoostedTreesClassifier),
}

impl ClassifierModel {
    pub fn validate(&self) -> Result<()> {
        match self {
            ClassifierModel::Softmax(m) => {
                if m.coefficients.len() != CLASS_COUNT || m.intercepts.len() != CLASS_COUNT {
                    bail!(
                        "softmax classifier has {} coefficient rows and {} intercepts, expected {CLASS_COUNT}",
                        m.coefficients.len(),
                        m.intercepts.len()
                    );
                }
                let width = m.coefficients[0].len();
                if m.coefficients.iter().any(|row| row.len() != width) {
                    bail!("softmax coefficient rows differ in width");
                }
            }
            ClassifierModel::BoostedTrees(m) => {
                if m.trees.len() != CLASS_COUNT || m.base_score.len() != CLASS_COUNT {
                    bail!(
                        "boosted classifier has {} ensembles and {} base scores, expected {CLASS_COUNT}",
                        m.trees.len(),
                        m.base_score.len()
                    );
                }
                for (class, ensemble) in m.trees.iter().enumerate() {
                    for (i, tree) in ensemble.iter().enumerate() {
                        tree.validate(m.n_features)
                            .with_context(|| format!("class {class} tree {i}"))?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl OutcomeClassifier for ClassifierModel {
    fn n_features(&self) -> usize {
        match self {
            ClassifierModel::Softmax(m) => m.coefficients.first().map_or(0, Vec::len),
            ClassifierModel::BoostedTrees(m) => m.n_features,
        }
    }

    fn predict_proba(&self, row: &[f64]) -> [f64; CLASS_COUNT] {
        let mut margins = [0.0; CLASS_COUNT];
        match self {
            ClassifierModel::Softmax(m) => {
                for (c, margin) in margins.iter_mut().enumerate() {
                    *margin = m.intercepts[c] + dot(&m.coefficients[c], row);
                }
            }
            ClassifierModel::BoostedTrees(m) => {
                for (c, margin) in margins.iter_mut().enumerate() {
                    *margin = m.base_score[c]
                        + m.trees[c].iter().map(|t| t.predict(row)).sum::<f64>();
                }
            }
        }
        softmax(margins)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegressor {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestRegressor {
    pub n_features: usize,
    pub trees: Vec<DecisionTree>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressorModel {
    Linear(LinearRegressor),
    Forest(ForestRegressor),
}

impl RegressorModel {
    pub fn validate(&self) -> Result<()> {
        if let RegressorModel::Forest(m) = self {
            if m.trees.is_empty() {
                bail!("forest has no trees");
            }
            for (i, tree) in m.trees.iter().enumerate() {
                tree.validate(m.n_features)
                    .with_context(|| format!("tree {i}"))?;
            }
        }
        Ok(())
    }
}

impl GoalRegressor for RegressorModel {
    fn n_features(&self) -> usize {
        match self {
            RegressorModel::Linear(m) => m.coefficients.len(),
            RegressorModel::Forest(m) => m.n_features,
        }
    }

    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            RegressorModel::Linear(m) => m.intercept + dot(&m.coefficients, row),
            RegressorModel::Forest(m) => {
                if m.trees.is_empty() {
                    return 0.0;
                }
                m.trees.iter().map(|t| t.predict(row)).sum::<f64>() / m.trees.len() as f64
            }
        }
    }
}

fn dot(weights: &[f64], row: &[f64]) -> f64 {
    weights.iter().zip(row).map(|(w, x)| w * x).sum()
}

fn softmax(margins: [f64; CLASS_COUNT]) -> [f64; CLASS_COUNT] {
    let mx = margins.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !mx.is_finite() {
        return [1.0 / CLASS_COUNT as f64; CLASS_COUNT];
    }
    let exp = margins.map(|m| (m - mx).exp());
    let den = exp.iter().sum::<f64>().max(1e-12);
    exp.map(|e| e / den)
}

/// Fitted models sharing one feature width; immutable once built.
pub struct ModelArtifacts {
    classifier: Box<dyn OutcomeClassifier>,
    home_regressor: Box<dyn GoalRegressor>,
    away_regressor: Box<dyn GoalRegressor>,
    scaler: Option<Box<dyn FeatureScaler>>,
    n_features: usize,
}

impl std::fmt::Debug for ModelArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifacts")
            .field("n_features", &self.n_features)
            .field("scaled", &self.scaler.is_some())
            .finish()
    }
}

impl ModelArtifacts {
    pub fn new(
        n_features: usize,
        classifier: Box<dyn OutcomeClassifier>,
        home_regressor: Box<dyn GoalRegressor>,
        away_regressor: Box<dyn GoalRegressor>,
        scaler: Option<Box<dyn FeatureScaler>>,
    ) -> Result<Self, PredictError> {
        let mut widths = vec![
            ("classifier", classifier.n_features()),
            ("home regressor", home_regressor.n_features()),
            ("away regressor", away_regressor.n_features()),
        ];
        if let Some(scaler) = &scaler {
            widths.push(("scaler", scaler.n_features()));
        }
        for (name, width) in widths {
            if width != n_features {
                return Err(PredictError::ArtifactsUnavailable(format!(
                    "{name} expects {width} features, feature list has {n_features}"
                )));
            }
        }
        Ok(Self {
            classifier,
            home_regressor,
            away_regressor,
            scaler,
            n_features,
        })
    }

    /// Reads the feature list and every model from `dir`. Only the scaler is optional.
    pub fn load_dir(dir: &Path) -> Result<(FeatureSchema, Self)> {
        let names: Vec<String> = read_json(&dir.join(FEATURES_FILE))?;
        let schema = FeatureSchema::new(names)?;

        let classifier: ClassifierModel = read_json(&dir.join(CLASSIFIER_FILE))?;
        classifier.validate().context("validate classifier")?;
        let home: RegressorModel = read_json(&dir.join(HOME_REGRESSOR_FILE))?;
        home.validate().context("validate home regressor")?;
        let away: RegressorModel = read_json(&dir.join(AWAY_REGRESSOR_FILE))?;
        away.validate().context("validate away regressor")?;

        let scaler_path = dir.join(SCALER_FILE);
        let scaler: Option<Box<dyn FeatureScaler>> = if scaler_path.exists() {
            let scaler: StandardScaler = read_json(&scaler_path)?;
            scaler.validate().context("validate scaler")?;
            Some(Box::new(scaler))
        } else {
            warn!(path = %scaler_path.display(), "no scaler artifact, rows pass through unscaled");
            None
        };

        let artifacts = Self::new(
            schema.len(),
            Box::new(classifier),
            Box::new(home),
            Box::new(away),
            scaler,
        )?;
        info!(
            dir = %dir.display(),
            features = schema.len(),
            scaled = artifacts.scaler.is_some(),
            "loaded model artifacts"
        );
        Ok((schema, artifacts))
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn scale(&self, row: &[f64]) -> Vec<f64> {
        match &self.scaler {
            Some(scaler) => scaler.transform(row),
            None => row.to_vec(),
        }
    }

    pub fn classify(&self, scaled: &[f64]) -> [f64; CLASS_COUNT] {
        self.classifier.predict_proba(scaled)
    }

    pub fn expected_goals(&self, scaled: &[f64]) -> (f64, f64) {
        (
            self.home_regressor.predict(scaled),
            self.away_regressor.predict(scaled),
        )
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| anyhow!("parse {}: {err}", path.display()))
}
