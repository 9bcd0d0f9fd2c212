use tracing_subscriber::EnvFilter;

/// Install the global subscriber, logs are written to stderr so stdout is
/// left for targets.
///
/// `levels` uses the `EnvFilter` directive syntax, e.g.
/// `nacos_sd=debug,nacos=info`. Invalid directives fall back to `info`.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|err| {
        eprintln!("invalid log level \"{levels}\", {err}, fallback to info");
        EnvFilter::new("info")
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // `try_init` fails only if a global subscriber is installed already,
    // which is fine for tests.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.with_ansi(color).try_init()
    };
}

/// Directives enabling `level` for the crates of this project only.
pub fn directives(level: &str) -> String {
    match level {
        "off" => "off".to_string(),
        level => ["nacos_sd", "discovery", "nacos"]
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_directives() {
        assert_eq!(
            directives("debug"),
            "nacos_sd=debug,discovery=debug,nacos=debug"
        );
        assert_eq!(directives("off"), "off");
    }

    #[test]
    fn init_twice() {
        init(false, false, "not a level=+");
        init(false, true, &directives("info"));
    }
}
