mod run;
mod server;

pub use self::{
    run::{RunConfig, Strategy},
    server::ResponderConfig,
};
