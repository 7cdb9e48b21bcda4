pub mod commit;
pub mod limits;
pub mod logging;
pub mod session;
pub mod token;
pub mod validation;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_ALLOWED_ORIGIN: &str = "allowed-origin";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("scoregate")
        .about("Admission gate for untrusted game score submissions")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("SCOREGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ORIGIN)
                .long(ARG_ALLOWED_ORIGIN)
                .help("Game frontend URL allowed by CORS (any origin when unset)")
                .env("SCOREGATE_ALLOWED_ORIGIN"),
        );

    let command = token::with_args(command);
    let command = limits::with_args(command);
    let command = validation::with_args(command);
    let command = session::with_args(command);
    let command = commit::with_args(command);
    logging::with_args(command)
}
