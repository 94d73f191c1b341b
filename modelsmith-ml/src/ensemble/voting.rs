use super::{FailurePolicy, VotingMode, aligned_proba};
use crate::algorithms::{Model, labels_from_proba, training_metrics};
use crate::data::{ClassIndex, TaskType, check_xy};
use crate::error::{MlError, Result};
use crate::metrics::Metrics;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A member dropped from a voting ensemble because it failed to fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedMember {
    pub index: usize,
    pub name: String,
    pub reason: String,
}

/// Mean (regression) or vote (classification) over independently fit members.
pub struct VotingEnsemble {
    members: Vec<Box<dyn Model>>,
    task: TaskType,
    mode: VotingMode,
    policy: FailurePolicy,
    /// Indices of members that fit successfully.
    active: Vec<usize>,
    excluded: Vec<ExcludedMember>,
    classes: Option<ClassIndex>,
    fitted: bool,
}

impl VotingEnsemble {
    pub fn new(members: Vec<Box<dyn Model>>, task: TaskType, mode: VotingMode) -> Self {
        Self {
            members,
            task,
            mode,
            policy: FailurePolicy::default(),
            active: Vec::new(),
            excluded: Vec::new(),
            classes: None,
            fitted: false,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn mode(&self) -> VotingMode {
        self.mode
    }

    pub fn members(&self) -> &[Box<dyn Model>] {
        &self.members
    }

    /// Members dropped during the last `fit`.
    pub fn excluded(&self) -> &[ExcludedMember] {
        &self.excluded
    }

    fn active_members(&self) -> impl Iterator<Item = &dyn Model> {
        self.active.iter().map(|&i| self.members[i].as_ref())
    }

    fn mean_prediction(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let mut sum = Array1::<f64>::zeros(x.nrows());
        for member in self.active_members() {
            sum += &member.predict(x)?;
        }
        Ok(sum / self.active.len() as f64)
    }

    /// Share of members voting for each class.
    fn vote_shares(&self, x: &Array2<f64>, classes: &ClassIndex) -> Result<Array2<f64>> {
        let mut votes = Array2::<f64>::zeros((x.nrows(), classes.len()));
        for member in self.active_members() {
            let labels = member.predict(x)?;
            for (row, &label) in labels.iter().enumerate() {
                if let Some(j) = classes.index_of(label) {
                    votes[[row, j]] += 1.0;
                }
            }
        }
        Ok(votes / self.active.len() as f64)
    }

    fn mean_proba(&self, x: &Array2<f64>, classes: &ClassIndex) -> Result<Array2<f64>> {
        let mut sum = Array2::<f64>::zeros((x.nrows(), classes.len()));
        for member in self.active_members() {
            sum += &aligned_proba(member, x, classes)?;
        }
        Ok(sum / self.active.len() as f64)
    }

    fn fitted_classes(&self) -> Result<&ClassIndex> {
        if !self.fitted {
            return Err(MlError::not_fitted("voting ensemble"));
        }
        self.classes
            .as_ref()
            .ok_or_else(|| MlError::model("voting regressor has no class probabilities"))
    }
}

impl Model for VotingEnsemble {
    fn name(&self) -> &str {
        "voting"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Metrics> {
        check_xy(x, y)?;
        if self.members.is_empty() {
            return Err(MlError::model("voting ensemble has no members"));
        }
        self.fitted = false;
        self.active.clear();
        self.excluded.clear();
        self.classes = match self.task {
            TaskType::Classification => Some(ClassIndex::from_targets(y)?),
            TaskType::Regression => None,
        };

        let outcomes: Vec<Result<Metrics>> = self
            .members
            .par_iter_mut()
            .map(|member| member.fit(x, y))
            .collect();

        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(_) => self.active.push(index),
                Err(e) => {
                    let name = self.members[index].name().to_string();
                    if self.policy == FailurePolicy::FailFast {
                        return Err(MlError::BaseModelFit {
                            index,
                            name,
                            reason: e.to_string(),
                        });
                    }
                    warn!(index, member = %name, error = %e, "excluding voting member");
                    self.excluded.push(ExcludedMember {
                        index,
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if self.active.is_empty() {
            let first = &self.excluded[0];
            return Err(MlError::BaseModelFit {
                index: first.index,
                name: first.name.clone(),
                reason: format!("every voting member failed; first error: {}", first.reason),
            });
        }
        if self.mode == VotingMode::Soft && self.task == TaskType::Classification {
            if let Some(member) = self.active_members().find(|m| m.classes().is_none()) {
                return Err(MlError::model(format!(
                    "soft voting needs probabilities but {} has none",
                    member.name()
                )));
            }
        }

        self.fitted = true;
        training_metrics(self, self.task, x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.fitted {
            return Err(MlError::not_fitted("voting ensemble"));
        }
        match (&self.classes, self.mode) {
            (None, _) => self.mean_prediction(x),
            (Some(classes), VotingMode::Hard) => {
                Ok(labels_from_proba(&self.vote_shares(x, classes)?, classes))
            }
            (Some(classes), VotingMode::Soft) => {
                Ok(labels_from_proba(&self.mean_proba(x, classes)?, classes))
            }
        }
    }

    /// Averaged member probabilities (soft) or vote shares (hard).
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let classes = self.fitted_classes()?;
        match self.mode {
            VotingMode::Hard => self.vote_shares(x, classes),
            VotingMode::Soft => self.mean_proba(x, classes),
        }
    }

    fn classes(&self) -> Option<&ClassIndex> {
        self.classes.as_ref()
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        let members = self.members.iter().map(|m| m.clone_unfitted()).collect();
        Box::new(
            VotingEnsemble::new(members, self.task, self.mode).with_failure_policy(self.policy),
        )
    }
}
