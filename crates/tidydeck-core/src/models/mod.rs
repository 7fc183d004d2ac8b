pub mod card;
pub mod deck;
pub mod note;
pub mod note_type;
pub mod template;

pub use card::*;
pub use deck::*;
pub use note::*;
pub use note_type::*;
pub use template::*;
