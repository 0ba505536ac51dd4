//! linkd - point-to-point link session daemon
//!
//! Parses the command line, sets up logging, builds a session over a Unix
//! datagram channel, and runs it. The process exit status is the session's
//! [`ExitCode`](linkd_core::ExitCode).

use std::process;

use clap::Parser;
use linkd_core::{ExitCode, LinkConfig, ProtocolTable};
use linkd_daemon::{Args, DatagramChannel, Session, StaticLinkControl, SystemEnv, logging, realms};
use nix::unistd::Uid;

fn main() -> process::ExitCode {
    let args = Args::parse();
    let log = logging::init(args.debug);

    let code = run(&args, log);
    process::ExitCode::from(code.as_u8())
}

fn run(args: &Args, log: logging::LogControl) -> ExitCode {
    if !Uid::effective().is_root() && !args.allow_unprivileged {
        tracing::error!("must be root to run linkd, since it is not setuid-root");
        return ExitCode::NotRoot;
    }

    let config = args.config();

    if let (Some(path), Some(user)) = (&config.realms_file, &config.user) {
        match realms::lookup_realm(path, user) {
            Ok(servers) if servers.is_empty() => tracing::warn!("no servers configured for {user}"),
            Ok(servers) => {
                for server in &servers.auth {
                    tracing::info!("auth server {}:{}", server.host, server.port);
                }
                for server in &servers.acct {
                    tracing::info!("accounting server {}:{}", server.host, server.port);
                }
            },
            Err(err) => tracing::error!("{err}"),
        }
    }

    let link_control = if args.auth {
        StaticLinkControl::new(LinkConfig::default()).with_authentication()
    } else {
        StaticLinkControl::new(LinkConfig::default())
    };
    let protocols = match ProtocolTable::builder().link_control(link_control).build() {
        Ok(protocols) => protocols,
        Err(err) => {
            tracing::error!("{err}");
            return ExitCode::OptionError;
        },
    };

    let mut channel = DatagramChannel::with_paths(&args.local_socket, &args.peer_socket);
    if let Some(connector) = &args.connector {
        channel = channel.connector(connector.clone());
    }

    let built = Session::builder(config, SystemEnv::new(), channel, protocols)
        .debug_hook(move |on| log.set_debug(on))
        .build();
    let mut session = match built {
        Ok(session) => session,
        Err(err) => {
            tracing::error!("{err}");
            return err.exit_code();
        },
    };

    session.run()
}
