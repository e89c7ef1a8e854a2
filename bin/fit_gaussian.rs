use std::time::Instant;

use apex_fit::{
    Dataset, FitTask, FitterConfig, LinearSolverType, ModelFunction, PointXY, init_logger,
};
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::{info, warn};

const PARAM_NAMES: [&str; 4] = ["xoff", "yoff", "b", "a"];

#[derive(Parser)]
#[command(name = "fit_gaussian")]
#[command(about = "Fit a Gaussian peak on a constant background to synthetic noisy data")]
struct Args {
    /// Number of data points
    #[arg(short = 'n', long, default_value = "100")]
    points: usize,

    /// Noise standard deviation, relative to the peak height
    #[arg(long, default_value = "0.1")]
    noise: f64,

    /// Seed of the noise generator
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Maximum number of Levenberg-Marquardt iterations
    #[arg(short, long, default_value = "100")]
    max_iterations: u32,

    /// Model flavour: "point", "vector", "generic" or "analytic"
    #[arg(long, default_value = "point")]
    model: String,

    /// Comma-separated indices of parameters kept at their initial value
    #[arg(long, value_delimiter = ',')]
    fix: Vec<usize>,

    /// Solve the normal equations with QR instead of Cholesky
    #[arg(long)]
    qr: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn gaussian(x: f64, p: &[f64]) -> Option<f64> {
    let (xoff, yoff, b, a) = (p[0], p[1], p[2], p[3]);
    if b == 0.0 {
        return None;
    }
    let t = (x - xoff) / b;
    Some(yoff + a * (-t * t).exp())
}

fn gaussian_derivative(x: f64, p: &[f64], out: &mut [f64]) -> Option<()> {
    let (xoff, b, a) = (p[0], p[2], p[3]);
    if b == 0.0 {
        return None;
    }
    let t = (x - xoff) / b;
    let e = (-t * t).exp();
    out[0] = 2.0 * a * e * t / b;
    out[1] = 1.0;
    out[2] = 2.0 * a * e * t * t / b;
    out[3] = e;
    Some(())
}

fn generate_data(
    truth: &[f64; 4],
    n: usize,
    noise: f64,
    seed: u64,
) -> Result<Vec<PointXY>, Box<dyn std::error::Error>> {
    if n < 2 {
        return Err(format!("need at least 2 points, got {n}").into());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, noise * truth[3])?;
    let (xmin, xmax) = (truth[0] - 3.2 * truth[2], truth[0] + 3.7 * truth[2]);

    let mut points = Vec::with_capacity(n);
    for i in 0..n {
        let x = xmin + (xmax - xmin) * i as f64 / (n - 1) as f64;
        let y = gaussian(x, truth).ok_or("invalid true parameters")? + normal.sample(&mut rng);
        points.push(PointXY::new(x, y));
    }
    Ok(points)
}

fn build_model<'a>(
    kind: &str,
    points: &'a [PointXY],
) -> Result<(ModelFunction<'a>, Dataset<'a>), Box<dyn std::error::Error>> {
    let residual = move |i: usize, p: &[f64]| {
        let point = points.get(i)?;
        Some(gaussian(point.x, p)? - point.y)
    };
    let model = match kind {
        "point" => return Ok((ModelFunction::point(4, gaussian), Dataset::Points(points))),
        "vector" => ModelFunction::vector(4, residual),
        "generic" => ModelFunction::generic(4, residual),
        "analytic" => ModelFunction::generic_with_derivative(4, residual, move |i, p, out| {
            gaussian_derivative(points.get(i)?.x, p, out)
        }),
        other => {
            return Err(format!(
                "Unknown model: {other}. Valid options: point, vector, generic, analytic"
            )
            .into());
        }
    };
    Ok((model, Dataset::Indexed(points.len())))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let args = Args::parse();

    let truth = [1e-5, 1e6, 1e-4, 2e5];
    let initial = [4e-5, -1e6, 2e-4, 4e5];

    let points = generate_data(&truth, args.points, args.noise, args.seed)?;
    info!(
        "Generated {} points (noise {}, seed {})",
        points.len(),
        args.noise,
        args.seed
    );

    let (model, dataset) = build_model(&args.model, &points)?;
    let mut task = FitTask::new(model, dataset)?;

    let solver = if args.qr {
        LinearSolverType::Qr
    } else {
        LinearSolverType::Cholesky
    };
    task.fitter_mut().set_config(
        FitterConfig::new()
            .with_max_iters(args.max_iterations)
            .with_linear_solver_type(solver)
            .with_verbose(args.verbose),
    );
    task.fitter_mut().set_params(&initial)?;
    for &index in &args.fix {
        task.set_fixed_param(index, true)?;
    }

    let initial_residuum = task.eval_residuum()?;
    info!(
        "Fitting {} model, {} free parameters, solver {}",
        task.model().kind(),
        task.n_free(),
        solver
    );
    info!("Initial residuum: {:.6e}", initial_residuum);

    let start = Instant::now();
    match task.fit() {
        Ok(converged) => info!(
            "Converged ({}) after {} iterations in {:?}",
            converged.reason,
            converged.iterations,
            start.elapsed()
        ),
        Err(e) if e.is_partial() => warn!("Fit stopped early: {}", e),
        Err(e) => return Err(e.into()),
    }

    let params = task.fitter().get_params()?.to_vec();
    let mut errors = [0.0; 4];
    let errors_ok = match task.param_errors(true, &mut errors) {
        Ok(()) => true,
        Err(e) => {
            warn!("Parameter errors unavailable: {}", e);
            false
        }
    };

    println!("\n{:<6} | {:>14} | {:>14} | {:>14}", "Param", "True", "Fitted", "Error");
    println!("{}", "-".repeat(58));
    for j in 0..4 {
        let error = if errors_ok {
            format!("{:>14.6e}", errors[j])
        } else {
            format!("{:>14}", "-")
        };
        let marker = if task.fixed_param(j)? { " (fixed)" } else { "" };
        println!(
            "{:<6} | {:>14.6e} | {:>14.6e} | {}{}",
            PARAM_NAMES[j], truth[j], params[j], error, marker
        );
    }

    if let Some(summary) = task.fitter().summary() {
        println!("\n{}", summary);
    }
    Ok(())
}
