pub mod cv;
pub mod dataset;
pub mod error;
pub mod lambda;
pub mod linalg;
pub mod losses;
pub mod path;
pub mod select;
pub mod solve;
pub mod solvers;
pub mod stability;
pub mod types;

pub use cv::{cross_validate, CvResult};
pub use dataset::{selected_mask, support, Dataset};
pub use error::LassoError;
pub use lambda::{default_cv_grid, default_path_grid, lambda_max, theoretical_lam};
pub use path::{solve_path, PathConfig, PathResult};
pub use select::choose_method;
pub use solve::{solve_fixed, FixedLambdaResult};
pub use solvers::{SolveOutcome, SolveStatus};
pub use stability::{stability_selection, StabSelResult};
pub use types::{
    ConcomitantWeight, CvConfig, Formulation, FormulationKind, Method, ResolvedFormulation,
    StabSelConfig, StabSelVariant, Task, FEASIBILITY_TOL, SUPPORT_THRESHOLD,
};
