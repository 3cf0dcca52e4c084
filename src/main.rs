use std::process;
use std::sync::Arc;
use std::time::Instant;

use clap::{App, Arg, ArgMatches};
use itertools::Itertools;
use tracing_subscriber::EnvFilter;

use linkage_checker::checker::{CheckerOptions, LinkageChecker};
use linkage_checker::classpath::parse_classpath;
use linkage_checker::problem::format_problems;

fn parse_args<'a>() -> ArgMatches<'a> {
    App::new("linkage-checker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Finds references in a JVM classpath that would fail to link at runtime")
        .arg(
            Arg::with_name("classpath")
                .value_name("CLASSPATH")
                .help("The classpath to check, ':'-separated; elements are paths or group:name:version=path")
                .index(1)
                .required(true)
        )
        .arg(
            Arg::with_name("entry-points")
                .long("entry-points")
                .value_name("N")
                .takes_value(true)
                .default_value("1")
                .help("Treats the first N classpath elements as entry points")
        )
        .arg(
            Arg::with_name("exclusion-file")
                .long("exclusion-file")
                .value_name("FILE")
                .takes_value(true)
                .help("Suppresses the linkage errors matched by the rules in this XML file")
        )
        .arg(
            Arg::with_name("reachable-only")
                .long("reachable-only")
                .help("Only reports problems in classes reachable from the entry points")
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .value_name("N")
                .takes_value(true)
                .help("Sets the number of worker threads")
        )
        .arg(
            Arg::with_name("system-package")
                .long("system-package")
                .value_name("PREFIX")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Treats classes under this package as supplied by the runtime")
        )
        .arg(
            Arg::with_name("verbose")
                .long("verbose")
                .takes_value(true)
                .possible_values(&["index", "parse", "resolve", "graph", "filter"])
                .use_delimiter(true)
                .help("Enables verbose logging for the provided phases")
        )
        .get_matches()
}

fn phase_targets(phase: &str) -> &'static [&'static str] {
    match phase {
        "index" => &["linkage_checker::classpath"],
        "parse" | "resolve" => &["linkage_checker::checker"],
        "graph" => &["linkage_checker::graph"],
        "filter" => &["linkage_checker::checker", "linkage_checker::exclusion"],
        _ => &[]
    }
}

fn init_logging(args: &ArgMatches) {
    let filter = match args.values_of("verbose") {
        Some(phases) => {
            let directives = phases
                .flat_map(phase_targets)
                .unique()
                .map(|target| format!(",{}=debug", target))
                .join("");

            EnvFilter::new(format!("warn{}", directives))
        },
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_count(args: &ArgMatches, name: &str) -> Option<usize> {
    let value = args.value_of(name)?;

    match value.parse() {
        Result::Ok(n) => Some(n),
        Result::Err(_) => {
            eprintln!("--{} expects a number, got {}", name, value);
            process::exit(2);
        }
    }
}

fn main() {
    let args = parse_args();
    init_logging(&args);

    let classpath_arg = args.value_of("classpath").unwrap();
    let classpath = match parse_classpath(classpath_arg) {
        Some(classpath) => classpath.into_iter().map(Arc::new).collect_vec(),
        None => {
            eprintln!("invalid classpath {}", classpath_arg);
            process::exit(2);
        }
    };

    let entry_points = parse_count(&args, "entry-points").unwrap_or(1);
    if entry_points > classpath.len() {
        eprintln!("--entry-points {} exceeds the {} classpath elements", entry_points, classpath.len());
        process::exit(2);
    };

    let mut options = CheckerOptions {
        reachable_only: args.is_present("reachable-only"),
        exclusion_file: args.value_of("exclusion-file").map(Into::into),
        threads: parse_count(&args, "threads"),
        ..CheckerOptions::default()
    };

    if let Some(prefixes) = args.values_of("system-package") {
        for prefix in prefixes {
            options.system_classes.add(prefix);
        };
    };

    let start = Instant::now();
    let checker = match LinkageChecker::create(classpath.clone(), &classpath[..entry_points], options) {
        Result::Ok(checker) => checker,
        Result::Err(err) => {
            eprintln!("error: {}", err);
            process::exit(2);
        }
    };

    let timings = checker.timings();
    println!(
        "Indexed {} classes from {} entries in {:.3}s",
        checker.index().len(),
        checker.index().entries().len(),
        timings.index.as_secs_f32()
    );
    println!("Parsed class files in {:.3}s", timings.parse.as_secs_f32());
    println!("Resolved references in {:.3}s", timings.resolve.as_secs_f32());
    println!(
        "Built reference graph of {} classes and {} edges in {:.3}s",
        checker.class_reference_graph().len(),
        checker.class_reference_graph().edge_count(),
        timings.graph.as_secs_f32()
    );

    let start_filter = Instant::now();
    let report = checker.report();
    println!("Filtered problems in {:.3}s", start_filter.elapsed().as_secs_f32());
    println!("Checked linkage in {:.3}s", start.elapsed().as_secs_f32());

    for w in report.warnings.iter() {
        eprintln!("warning: {}", w);
    };

    for e in report.unresolvable_entries.iter() {
        println!("{}", e);
    };

    for i in report.invalid_class_files.iter() {
        println!("{}", i);
    };

    if report.has_problems() {
        println!();
        print!("{}", format_problems(&report.problems, Some(checker.classpath_result())));
        println!("Found {} linkage problems", report.problems.len());
        process::exit(1);
    } else {
        println!("No linkage problems found");
    };
}
