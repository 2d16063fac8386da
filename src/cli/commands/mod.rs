//! One module per subcommand, each exposing `execute`.

pub mod delete;
pub mod generate_key;
pub mod get;
pub mod init;
pub mod list;
pub mod rotate;
pub mod set;
