use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LassoError;
use crate::lambda;

/// Magnitude below which a coefficient counts as zero for support purposes.
pub const SUPPORT_THRESHOLD: f64 = 1e-3;

/// Constraint feasibility tolerance expected of any returned solution.
pub const FEASIBILITY_TOL: f64 = 1e-6;

/// The six named problem formulations. The name is derived from the
/// formulation flags with fixed precedence (huber, then classification, then
/// concomitant) and is the wire contract with any configuration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormulationKind {
    Ls,
    Huber,
    Concomitant,
    ConcomitantHuber,
    Classification,
    HuberClassification,
}

impl FormulationKind {
    pub fn is_concomitant(self) -> bool {
        matches!(
            self,
            FormulationKind::Concomitant | FormulationKind::ConcomitantHuber
        )
    }

    pub fn is_classification(self) -> bool {
        matches!(
            self,
            FormulationKind::Classification | FormulationKind::HuberClassification
        )
    }

    pub fn is_huber(self) -> bool {
        matches!(
            self,
            FormulationKind::Huber
                | FormulationKind::ConcomitantHuber
                | FormulationKind::HuberClassification
        )
    }
}

impl fmt::Display for FormulationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormulationKind::Ls => "LS",
            FormulationKind::Huber => "Huber",
            FormulationKind::Concomitant => "Concomitant",
            FormulationKind::ConcomitantHuber => "Concomitant_Huber",
            FormulationKind::Classification => "Classification",
            FormulationKind::HuberClassification => "Huber_Classification",
        };
        f.write_str(name)
    }
}

impl FromStr for FormulationKind {
    type Err = LassoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LS" => Ok(FormulationKind::Ls),
            "Huber" => Ok(FormulationKind::Huber),
            "Concomitant" => Ok(FormulationKind::Concomitant),
            "Concomitant_Huber" => Ok(FormulationKind::ConcomitantHuber),
            "Classification" => Ok(FormulationKind::Classification),
            "Huber_Classification" => Ok(FormulationKind::HuberClassification),
            other => Err(LassoError::UnknownFormulation(other.to_string())),
        }
    }
}

/// Concomitant degrees-of-freedom weight. The original tool used string
/// sentinels ("n", "n/2", "not specified"); here the deferral is explicit and
/// resolved once the sample count is known, at the start of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ConcomitantWeight {
    /// Resolve to n for Huber formulations and n/2 otherwise.
    #[default]
    Unspecified,
    N,
    HalfN,
    Absolute(f64),
}

impl ConcomitantWeight {
    pub fn resolve(self, n: usize, huber: bool) -> f64 {
        match self {
            ConcomitantWeight::Unspecified => {
                if huber {
                    n as f64
                } else {
                    n as f64 / 2.0
                }
            }
            ConcomitantWeight::N => n as f64,
            ConcomitantWeight::HalfN => n as f64 / 2.0,
            ConcomitantWeight::Absolute(v) => v,
        }
    }
}

/// Immutable description of which loss/regularizer variant is active and its
/// scalar hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Formulation {
    pub huber: bool,
    pub concomitant: bool,
    pub classification: bool,
    /// Huber robustness threshold; meaningful only when `huber`.
    pub rho: f64,
    /// Huberized-hinge threshold, negative by convention; meaningful only for
    /// Huber classification.
    pub rho_classification: f64,
    pub e: ConcomitantWeight,
}

impl Default for Formulation {
    fn default() -> Self {
        Formulation {
            huber: false,
            concomitant: true,
            classification: false,
            rho: 1.345,
            rho_classification: -1.0,
            e: ConcomitantWeight::Unspecified,
        }
    }
}

impl Formulation {
    /// Flag precedence is fixed: huber, then classification, then
    /// concomitant. Classification forces the concomitant flag off.
    pub fn kind(&self) -> FormulationKind {
        if self.huber {
            if self.classification {
                FormulationKind::HuberClassification
            } else if self.concomitant {
                FormulationKind::ConcomitantHuber
            } else {
                FormulationKind::Huber
            }
        } else if self.classification {
            FormulationKind::Classification
        } else if self.concomitant {
            FormulationKind::Concomitant
        } else {
            FormulationKind::Ls
        }
    }

    /// Resolve the deferred pieces into concrete solver parameters for a
    /// dataset with `n` samples.
    pub fn resolve(&self, n: usize) -> ResolvedFormulation {
        ResolvedFormulation {
            kind: self.kind(),
            rho: self.rho,
            rho_classification: self.rho_classification,
            e: self.e.resolve(n, self.huber),
        }
    }
}

impl From<FormulationKind> for Formulation {
    fn from(kind: FormulationKind) -> Self {
        Formulation {
            huber: kind.is_huber(),
            concomitant: kind.is_concomitant(),
            classification: kind.is_classification(),
            ..Formulation::default()
        }
    }
}

/// A formulation with every deferred value resolved; what the solvers consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedFormulation {
    pub kind: FormulationKind,
    pub rho: f64,
    pub rho_classification: f64,
    pub e: f64,
}

/// The four numerical algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    PathAlg,
    Ppds,
    PfPds,
    Dr,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::PathAlg => "Path-Alg",
            Method::Ppds => "P-PDS",
            Method::PfPds => "PF-PDS",
            Method::Dr => "DR",
        };
        f.write_str(name)
    }
}

impl FromStr for Method {
    type Err = LassoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Path-Alg" => Ok(Method::PathAlg),
            "P-PDS" => Ok(Method::Ppds),
            "PF-PDS" => Ok(Method::PfPds),
            "DR" => Ok(Method::Dr),
            other => Err(LassoError::UnknownMethod(other.to_string())),
        }
    }
}

/// Task contexts consulted by method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    FixedLambda,
    Path,
    CrossValidation,
    StabilitySelection,
}

/// Stability selection aggregation policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StabSelVariant {
    /// Run each subsample path until `q` coefficients are active; aggregate
    /// ever-active indicators.
    First { q: usize },
    /// Run each subsample path down to `lamin` (or until n_sub - k actives
    /// when `hd`); aggregate maximum-ever-active indicators.
    Max { lamin: f64, hd: bool },
    /// One fixed-lambda solve per subsample. `lam` is a fraction of
    /// lambda_max unless `true_lam`.
    Lam { lam: f64, true_lam: bool },
}

impl Default for StabSelVariant {
    fn default() -> Self {
        StabSelVariant::First { q: 10 }
    }
}

/// Cross-validation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvConfig {
    pub k: usize,
    /// Fractions of lambda_max, decreasing.
    pub lambdas: Vec<f64>,
    /// Fold assignment shuffle; `None` keeps contiguous folds.
    pub seed: Option<u64>,
    pub one_se: bool,
    pub method: Option<Method>,
}

impl Default for CvConfig {
    fn default() -> Self {
        CvConfig {
            k: 5,
            lambdas: lambda::default_cv_grid(100),
            seed: None,
            one_se: true,
            method: None,
        }
    }
}

/// Stability selection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabSelConfig {
    pub variant: StabSelVariant,
    /// Number of subsamples.
    pub b: usize,
    /// Subsample size as a fraction of n.
    pub percent_ns: f64,
    pub seed: u64,
    /// Fractions of lambda_max for the path-based variants, decreasing.
    pub lambdas: Vec<f64>,
    /// Frequency above which a feature counts as selected.
    pub threshold: f64,
    pub method: Option<Method>,
}

impl Default for StabSelConfig {
    fn default() -> Self {
        StabSelConfig {
            variant: StabSelVariant::default(),
            b: 50,
            percent_ns: 0.5,
            seed: 0,
            lambdas: lambda::default_path_grid(40),
            threshold: 0.8,
            method: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formulation_name_precedence() {
        let mut f = Formulation::default();
        assert_eq!(f.kind(), FormulationKind::Concomitant);
        f.concomitant = false;
        assert_eq!(f.kind(), FormulationKind::Ls);
        f.huber = true;
        assert_eq!(f.kind(), FormulationKind::Huber);
        f.concomitant = true;
        assert_eq!(f.kind(), FormulationKind::ConcomitantHuber);
        f.classification = true;
        // Classification wins over concomitant under huber.
        assert_eq!(f.kind(), FormulationKind::HuberClassification);
        f.huber = false;
        assert_eq!(f.kind(), FormulationKind::Classification);
    }

    #[test]
    fn formulation_names_round_trip() {
        for name in [
            "LS",
            "Huber",
            "Concomitant",
            "Concomitant_Huber",
            "Classification",
            "Huber_Classification",
        ] {
            let kind: FormulationKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
        assert!("Lasso".parse::<FormulationKind>().is_err());
    }

    #[test]
    fn method_names_round_trip() {
        for name in ["Path-Alg", "P-PDS", "PF-PDS", "DR"] {
            let m: Method = name.parse().unwrap();
            assert_eq!(m.to_string(), name);
        }
        assert!("ODE".parse::<Method>().is_err());
    }

    #[test]
    fn concomitant_weight_resolution() {
        assert_eq!(ConcomitantWeight::Unspecified.resolve(10, false), 5.0);
        assert_eq!(ConcomitantWeight::Unspecified.resolve(10, true), 10.0);
        assert_eq!(ConcomitantWeight::N.resolve(7, false), 7.0);
        assert_eq!(ConcomitantWeight::HalfN.resolve(7, true), 3.5);
        assert_eq!(ConcomitantWeight::Absolute(2.5).resolve(7, true), 2.5);
    }
}
