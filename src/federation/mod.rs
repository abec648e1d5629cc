// Federation across clients
// Weighted table averaging, convergence tracking and the triggers deciding when to run it

pub mod aggregation;
pub mod convergence;
pub mod coordinator;
pub mod trigger;

pub use aggregation::{fed_avg, proportional_weights};
pub use convergence::{compute_delta, ModelDelta, CHANGE_EPSILON, CONVERGENCE_THRESHOLD};
pub use coordinator::{
    AggregationOutcome, FederationCoordinator, FederationRound, FederationState, RoundCause,
};
pub use trigger::{
    build_trigger, EpisodeCountTrigger, FederationProgress, FederationTrigger,
    PerformancePlateauTrigger,
};
