pub mod assessments;
pub mod attendance;
pub mod audit;
pub mod maintenance;
pub mod meals;
pub mod pagination;
pub mod schools;
pub mod sessions;
pub mod soft_delete;
pub mod students;
pub mod tokens;
pub mod trainings;
pub mod users;
pub mod workers;

pub use assessments::*;
pub use attendance::*;
pub use audit::*;
pub use maintenance::*;
pub use meals::*;
pub use pagination::*;
pub use schools::*;
pub use sessions::*;
pub use soft_delete::*;
pub use students::*;
pub use tokens::*;
pub use trainings::*;
pub use users::*;
pub use workers::*;
