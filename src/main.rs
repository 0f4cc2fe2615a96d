use anyhow::{bail, Context};
use clap::{Arg, ArgMatches, Command};
use vanco_pk::{
    advisor::RegimenAdvisor,
    creatinine::{CreatinineFunction, CreatinineModel},
    dosing::DoseScheduleBuilder,
    example_data::ExampleDataGenerator,
    models::*,
    output::{OutputManager, SimulationReport},
    parameters::ParameterCalculator,
    parser::{EventParser, PatientEvents},
    SimulationContext, VancoModel,
};
use chrono::{Duration, NaiveDateTime};
use std::path::{Path, PathBuf};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = build_cli().get_matches();
    let output_dir = PathBuf::from(
        matches
            .get_one::<String>("output")
            .map(String::as_str)
            .unwrap_or("./vanco_results"),
    );

    let mut input = matches.get_one::<String>("input").map(PathBuf::from);

    if matches.get_flag("generate-example") {
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("creating {}", output_dir.display()))?;
        let example_file = output_dir.join("example_events.csv");
        ExampleDataGenerator::generate_events(&example_file)?;
        println!("Generated example events: {}", example_file.display());

        if input.is_none() {
            input = Some(example_file);
        }
    }

    match input {
        Some(input_path) => run_forecast(&input_path, &output_dir, &matches),
        None => {
            println!("No input file specified. Use --generate-example to create sample data.");
            Ok(())
        }
    }
}

fn build_cli() -> Command {
    Command::new("Vancomycin PK Forecast")
        .version("0.1")
        .about("Vancomycin concentration forecasting with renal-function-driven elimination")
        .arg(Arg::new("input").short('i').long("input").value_name("FILE")
            .help("Event file (DATETIME,EVENT,VALUE with CREAT/DOSE/LEVEL events)")
            .required_unless_present("generate-example"))
        .arg(Arg::new("output").short('o').long("output").value_name("DIR")
            .help("Output directory for results").default_value("./vanco_results"))
        .arg(Arg::new("generate-example").long("generate-example")
            .help("Write an example event file and forecast it")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("age").long("age").value_name("YEARS").default_value("65"))
        .arg(Arg::new("sex").long("sex").value_name("M|F").default_value("M"))
        .arg(Arg::new("weight").long("weight").value_name("KG").default_value("80"))
        .arg(Arg::new("height").long("height").value_name("CM").default_value("175"))
        .arg(Arg::new("muscle-factor").long("muscle-factor").value_name("FACTOR")
            .help("Creatinine production multiplier").default_value("1.0"))
        .arg(Arg::new("mode").long("mode").value_name("MODE")
            .help("Elimination mode: crcl, kgfr").default_value("crcl"))
        .arg(Arg::new("scheme").long("scheme").value_name("SCHEME")
            .help("Integration scheme: euler, exponential").default_value("euler"))
        .arg(Arg::new("steps-per-hour").long("steps-per-hour").value_name("N").default_value("12"))
        .arg(Arg::new("days").long("days").value_name("DAYS")
            .help("Simulation length in days").default_value("7"))
        .arg(Arg::new("sim-start").long("sim-start").value_name("DATETIME")
            .help("Simulation start (default: midnight before the first event)"))
        .arg(Arg::new("future-creatinine").long("future-creatinine").value_name("UMOL_L")
            .help("Expected creatinine 48 h after the last measurement"))
        .arg(Arg::new("creatinine-modifier").long("creatinine-modifier").value_name("FACTOR")
            .help("Hold creatinine at first value times this factor").default_value("1.0"))
        .arg(Arg::new("ordered-dose").long("ordered-dose").value_name("MG")
            .help("Standing order amount"))
        .arg(Arg::new("ordered-interval").long("ordered-interval").value_name("HOURS").default_value("12"))
        .arg(Arg::new("ordered-start").long("ordered-start").value_name("DATETIME")
            .help("First standing-order dose (default: simulation start)"))
        .arg(Arg::new("target-auc").long("target-auc").value_name("AUC").default_value("500"))
        .arg(Arg::new("ci-level").long("ci-level").value_name("LEVEL").default_value("0.5"))
        .arg(Arg::new("require-kgfr").long("require-kgfr")
            .help("Fail when kinetic GFR cannot be computed in kgfr mode")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("try-suggested").long("try-suggested")
            .help("Also simulate the suggested regimen")
            .action(clap::ArgAction::SetTrue))
}

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = matches
        .get_one::<String>(name)
        .with_context(|| format!("missing --{}", name))?;
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid --{} value '{}': {}", name, raw, e))
}

fn parse_optional<T>(matches: &ArgMatches, name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match matches.get_one::<String>(name) {
        Some(_) => parse_arg(matches, name).map(Some),
        None => Ok(None),
    }
}

fn parse_datetime_arg(matches: &ArgMatches, name: &str) -> anyhow::Result<Option<NaiveDateTime>> {
    match matches.get_one::<String>(name) {
        Some(raw) => Ok(Some(EventParser::parse_datetime(raw)?)),
        None => Ok(None),
    }
}

fn create_patient(matches: &ArgMatches) -> anyhow::Result<Patient> {
    let patient = Patient::new(
        parse_arg(matches, "age")?,
        parse_arg(matches, "sex")?,
        parse_arg(matches, "weight")?,
        parse_arg(matches, "height")?,
    )
    .with_muscle_factor(parse_arg(matches, "muscle-factor")?);

    patient.validate()?;
    Ok(patient)
}

fn create_simulation_config(matches: &ArgMatches) -> anyhow::Result<SimulationConfig> {
    let scheme = match matches.get_one::<String>("scheme").map(String::as_str) {
        Some("exponential") => IntegrationScheme::Exponential,
        Some("euler") | None => IntegrationScheme::Euler,
        Some(other) => bail!("unknown integration scheme: {}", other),
    };

    Ok(SimulationConfig {
        steps_per_hour: parse_arg(matches, "steps-per-hour")?,
        scheme,
        target_auc: parse_arg(matches, "target-auc")?,
        ci_level: parse_arg(matches, "ci-level")?,
        require_kinetic_gfr: matches.get_flag("require-kgfr"),
        ..SimulationConfig::default()
    })
}

fn default_sim_start(events: &PatientEvents) -> anyhow::Result<NaiveDateTime> {
    let earliest = events
        .earliest()
        .context("event file contains no events")?;
    earliest
        .date()
        .and_hms_opt(0, 0, 0)
        .context("cannot build midnight for the first event")
}

fn run_forecast(input_path: &Path, output_dir: &Path, matches: &ArgMatches) -> anyhow::Result<()> {
    println!("Starting vancomycin forecast...");
    println!("Input file: {}", input_path.display());
    println!("Output directory: {}", output_dir.display());

    let events = EventParser::parse_events(input_path)
        .with_context(|| format!("reading {}", input_path.display()))?;
    let patient = create_patient(matches)?;
    let config = create_simulation_config(matches)?;

    let sim_start = match parse_datetime_arg(matches, "sim-start")? {
        Some(start) => start,
        None => default_sim_start(&events)?,
    };
    let duration_days: f64 = parse_arg(matches, "days")?;
    let sim_end = sim_start + Duration::minutes((duration_days * 24.0 * 60.0).round() as i64);

    let creatinine = CreatinineModel::build(
        &events.creatinine,
        parse_optional(matches, "future-creatinine")?,
        parse_arg(matches, "creatinine-modifier")?,
        Some(&patient),
    )?;
    let mode: EliminationMode = parse_arg(matches, "mode")?;
    let ctx = SimulationContext::new(&patient, &creatinine, sim_start, mode);

    let mut doses = DoseScheduleBuilder::build_manual_doses(&events.dose_amounts, &events.dose_times, sim_start)?;
    if let Some(amount) = parse_optional::<f64>(matches, "ordered-dose")? {
        let interval: f64 = parse_arg(matches, "ordered-interval")?;
        let start = parse_datetime_arg(matches, "ordered-start")?.unwrap_or(sim_start);
        doses.extend(DoseScheduleBuilder::build_ordered_doses(amount, interval, start, sim_start, sim_end)?);
    }

    let population = ParameterCalculator::pk_params_from_patient(&patient, &creatinine, sim_start);
    let mut model = VancoModel::from_patient(&ctx, config.clone());

    let (fit, multiplier_ci, band) = if events.levels.is_empty() {
        println!("No measured levels: using population PK estimates.");
        (None, None, None)
    } else {
        let fit = model.fit_ke_from_levels(&ctx, &doses, &events.levels, duration_days)?;
        println!("Model fitted to {} level(s).", fit.n_levels);
        let ci = model.compute_ci(config.ci_level)?;
        let band = model.confidence_band(&ctx, &doses, duration_days, config.ci_level)?;
        (Some(fit), Some(ci), Some(band))
    };

    let result = model.run(&ctx, &doses, duration_days)?;

    let suggestion = RegimenAdvisor::suggest_regimen(&model, &result, config.target_auc);
    let steady_state = suggestion.map(|s| {
        RegimenAdvisor::steady_state_levels(s.dose, s.interval, result.ke, result.vd, config.infusion_rate)
    });
    let dose_interval = match (&fit, &suggestion) {
        (Some(_), Some(s)) => Some(RegimenAdvisor::dose_interval(
            &model, &result, config.target_auc, s.interval, config.ci_level, 1000, 42,
        )?),
        _ => None,
    };

    let trial = match suggestion {
        Some(s) if matches.get_flag("try-suggested") => {
            Some(model.simulate_regimen(&ctx, s.dose, s.interval, sim_start, sim_end)?)
        }
        _ => None,
    };

    let creatinine_samples = result
        .time
        .iter()
        .map(|&h| creatinine.reading_at(ctx.datetime_at(h)))
        .collect();

    let report = SimulationReport {
        patient: patient.clone(),
        sim_start,
        population,
        fit,
        multiplier_ci,
        result,
        band,
        trial,
        suggestion,
        steady_state,
        dose_interval,
        creatinine: creatinine_samples,
    };

    println!("Saving results...");
    OutputManager::save_results(&report, output_dir)?;
    print_forecast_summary(&report);

    Ok(())
}

fn print_forecast_summary(report: &SimulationReport) {
    let result = &report.result;

    println!("\n=== FORECAST SUMMARY ===");
    println!("Population CrCl: {:.1} mL/min", report.population.crcl);
    println!("ke: {:.4} 1/h (half-life {:.1} h)", result.ke, result.half_life);
    println!("Vd: {:.1} L", result.vd);
    println!("AUC24: {:.0} - {}", result.auc24, result.auc_status());

    if let Some(fit) = &report.fit {
        println!("Fitted multiplier: {:.3} (SD {:.3})", fit.multiplier, fit.sd);
        if fit.approximate {
            println!("  (posterior curvature unusable; interval is approximate)");
        }
    }

    if let Some(s) = &report.suggestion {
        println!("Suggested: {} mg q{}h (AUC24 ~ {:.0})", s.dose, s.interval, s.predicted_auc);
    }

    if let Some(trial) = &report.trial {
        println!("Suggested regimen simulated AUC24: {:.0} - {}", trial.auc24, trial.auc_status());
    }

    for warning in &result.warnings {
        println!("Warning: {}", warning);
    }

    println!("\nResults saved to output directory.");
}
