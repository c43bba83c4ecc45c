//! Command-line front end for the sort engine.

use std::process;

use clap::{Arg, Command};

use ksort::{
    config::{KeySpec, SortConfig},
    error::{SortError, SortResult},
    EXIT_SUCCESS,
};

fn main() {
    env_logger::init();
    process::exit(run());
}

fn run() -> i32 {
    let matches = build_cli().get_matches();

    let (config, files) = match parse_config_from_matches(&matches) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("ksort: {}", e);
            return e.exit_code();
        }
    };

    // -C reports violations through the exit status alone
    let silent = config.check_silent;
    match ksort::sort(config, &files) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            if !(silent && e.is_check_violation()) {
                eprintln!("ksort: {}", e);
            }
            e.exit_code()
        }
    }
}

fn build_cli() -> Command {
    Command::new("ksort")
        .version(env!("CARGO_PKG_VERSION"))
        .override_usage("ksort [OPTION]... [FILE]...")
        .about("Sort, merge or check text files")
        .arg(
            Arg::new("files")
                .help("Input files (use '-' or omit for stdin)")
                .num_args(0..)
                .value_name("FILE"),
        )
        // Ordering options
        .arg(
            Arg::new("numeric-sort")
                .short('n')
                .long("numeric-sort")
                .help("Compare according to decimal numeric value")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("reverse")
                .short('r')
                .long("reverse")
                .help("Reverse the result of comparisons")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ignore-case")
                .short('f')
                .long("ignore-case")
                .help("Fold lower case to upper case characters")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dictionary-order")
                .short('d')
                .long("dictionary-order")
                .help("Consider only blanks and alphanumeric characters")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ignore-leading-blanks")
                .short('b')
                .long("ignore-leading-blanks")
                .help("Ignore leading blanks in key fields")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ignore-nonprinting")
                .short('i')
                .long("ignore-nonprinting")
                .help("Consider only printable characters")
                .action(clap::ArgAction::SetTrue),
        )
        // Field and key options
        .arg(
            Arg::new("field-separator")
                .short('t')
                .long("field-separator")
                .help("Use SEP instead of blank-to-non-blank transitions")
                .value_name("SEP"),
        )
        .arg(
            Arg::new("key")
                .short('k')
                .long("key")
                .help("Sort via a key; KEYDEF gives location and type")
                .long_help(
                    "Sort via a key; KEYDEF is F[.C][OPTS][,F[.C][OPTS]] for start \
                     and stop position, where F is a field number and C a character \
                     position in the field, both origin 1. The stop position \
                     defaults to the line's end. OPTS is one or more of [bdfinr], \
                     overriding global ordering options for that key.",
                )
                .value_name("KEYDEF")
                .action(clap::ArgAction::Append),
        )
        // Operation modes
        .arg(
            Arg::new("check")
                .short('c')
                .long("check")
                .help("Check for sorted input; do not sort")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check-silent")
                .short('C')
                .help("Like -c, but do not report the first bad line")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("merge")
                .short('m')
                .long("merge")
                .help("Merge already sorted files; do not sort")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("unique")
                .short('u')
                .long("unique")
                .help("Output only the first of an equal run")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stable")
                .short('s')
                .long("stable")
                .help("Accepted for compatibility; the sort is always stable")
                .action(clap::ArgAction::SetTrue),
        )
        // I/O options
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Write result to FILE instead of standard output")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("zero-terminated")
                .short('z')
                .long("zero-terminated")
                .help("Record delimiter is NUL, not newline")
                .action(clap::ArgAction::SetTrue),
        )
        // Capacity options
        .arg(
            Arg::new("buffer-size")
                .short('S')
                .long("buffer-size")
                .help("Use SIZE for the chunk buffer (suffixes b, K, M, G)")
                .value_name("SIZE"),
        )
        .arg(
            Arg::new("chunk-records")
                .long("chunk-records")
                .help("Cap the number of records per in-memory chunk")
                .value_name("N"),
        )
        .arg(
            Arg::new("fan-in")
                .long("fan-in")
                .help("Merge at most N runs at a time")
                .value_name("N"),
        )
        .arg(
            Arg::new("open-runs")
                .long("open-runs")
                .help("Keep at most N temporary runs open at once")
                .value_name("N"),
        )
        .arg(
            Arg::new("temporary-directory")
                .short('T')
                .long("temporary-directory")
                .help("Use DIR for temporaries, not $TMPDIR or /tmp")
                .value_name("DIR"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Write the encoded comparison keys as hex instead of lines")
                .action(clap::ArgAction::SetTrue),
        )
}

fn parse_config_from_matches(
    matches: &clap::ArgMatches,
) -> SortResult<(SortConfig, Vec<String>)> {
    let mut config = SortConfig::new();

    config.global_flags.numeric = matches.get_flag("numeric-sort");
    config.global_flags.reverse = matches.get_flag("reverse");
    config.global_flags.fold_case = matches.get_flag("ignore-case");
    config.global_flags.dictionary = matches.get_flag("dictionary-order");
    config.global_flags.printable_only = matches.get_flag("ignore-nonprinting");
    if matches.get_flag("ignore-leading-blanks") {
        config.global_flags.skip_start_blanks = true;
        config.global_flags.skip_end_blanks = true;
    }

    config.unique = matches.get_flag("unique");
    config.check = matches.get_flag("check") || matches.get_flag("check-silent");
    config.check_silent = matches.get_flag("check-silent");
    config.merge = matches.get_flag("merge");
    config.key_dump = matches.get_flag("debug");
    if matches.get_flag("zero-terminated") {
        config.record_delimiter = 0;
    }

    if let Some(sep) = matches.get_one::<String>("field-separator") {
        let bytes = sep.as_bytes();
        if bytes.len() != 1 {
            return Err(SortError::invalid_option(&format!(
                "field separator must be a single byte, got `{}'",
                sep
            )));
        }
        config.field_separator = Some(bytes[0]);
    }

    if let Some(keydefs) = matches.get_many::<String>("key") {
        for keydef in keydefs {
            config.keys.push(KeySpec::parse(keydef)?);
        }
    }

    if let Some(output) = matches.get_one::<String>("output") {
        config.output_file = Some(output.clone());
    }
    if let Some(temp_dir) = matches.get_one::<String>("temporary-directory") {
        config.temp_dir = Some(temp_dir.clone());
    }

    if let Some(size) = matches.get_one::<String>("buffer-size") {
        config.set_chunk_bytes_from_string(size)?;
        config.line_max = config.line_max.min(config.chunk_bytes);
    }
    if let Some(n) = matches.get_one::<String>("chunk-records") {
        config.chunk_records = parse_count(n, "chunk record cap")?;
    }
    if let Some(n) = matches.get_one::<String>("fan-in") {
        config.fan_in = parse_count(n, "merge fan-in")?;
    }
    if let Some(n) = matches.get_one::<String>("open-runs") {
        config.max_open_runs = parse_count(n, "open-run ceiling")?;
    }

    let files: Vec<String> = matches
        .get_many::<String>("files")
        .unwrap_or_default()
        .cloned()
        .collect();

    Ok((config, files))
}

fn parse_count(value: &str, what: &str) -> SortResult<usize> {
    value
        .parse()
        .map_err(|_| SortError::invalid_option(&format!("invalid {}: `{}'", what, value)))
}
