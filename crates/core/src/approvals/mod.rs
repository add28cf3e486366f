pub mod quiz;
pub mod routing;

pub use quiz::{QuizGrade, QuizGrader, SubmittedAnswer, DEFAULT_PASSING_SCORE};
pub use routing::{ApproverResolver, RoutedApprover, RoutingError, SubstituteRouter};
