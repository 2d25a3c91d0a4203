use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chainsum::{ChainState, Context, Error, IndexOrder, ParameterShape, Run};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const SAMPLER_COLUMNS: [&str; 7] = [
    "lp__",
    "accept_stat__",
    "stepsize__",
    "treedepth__",
    "n_leapfrog__",
    "divergent__",
    "energy__",
];

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn preamble(num_samples: usize, chain: usize) -> String {
    format!(
        "# model = bernoulli_model\n\
         # method = sample (Default)\n\
         #   sample\n\
         #     num_samples = {}\n\
         #     num_warmup = 1000 (Default)\n\
         #     save_warmup = 0 (Default)\n\
         #     thin = 1 (Default)\n\
         #     algorithm = hmc (Default)\n\
         #       hmc\n\
         #         engine = nuts (Default)\n\
         #           nuts\n\
         #             max_depth = 10 (Default)\n\
         #         metric = diag_e (Default)\n\
         #         stepsize = 1 (Default)\n\
         # id = {}\n\
         # data\n\
         #   file = bernoulli.data.json\n",
        num_samples,
        chain + 1
    )
}

/// Bernoulli-model style output: 7 sampler columns plus `theta` in (0, 1).
fn bernoulli_chain(chain: usize, declared: usize, rows: usize) -> String {
    let mut rng = StdRng::seed_from_u64(0x9e37_79b9 + chain as u64);
    let mut text = preamble(declared, chain);
    text.push_str(&SAMPLER_COLUMNS.join(","));
    text.push_str(",theta\n");
    text.push_str("# Adaptation terminated\n# Step size = 0.92\n");
    text.push_str("# Diagonal elements of inverse mass matrix:\n# 0.51\n");
    let mut theta: f64 = 0.25;
    for _ in 0..rows {
        theta = (0.5 * theta + 0.5 * (0.05 + 0.4 * rng.gen::<f64>())).clamp(0.001, 0.999);
        let energy = 7.0 + 2.0 * rng.gen::<f64>();
        let depth = if rng.gen::<f64>() < 0.6 { 1 } else { 2 };
        writeln!(
            text,
            "{:.6},{:.4},0.92,{},{},0,{:.6},{:.6}",
            -7.0 - 3.0 * rng.gen::<f64>(),
            rng.gen::<f64>(),
            depth,
            2 * depth + 1,
            energy,
            theta
        )
        .unwrap();
    }
    text.push_str("# \n#  Elapsed Time: 0.006 seconds (Warm-up)\n#                0.012 seconds (Sampling)\n");
    text
}

/// Output with `columns` generic columns `c0, c1, ...`.
fn generic_chain(chain: usize, draws: usize, columns: usize) -> String {
    let mut text = preamble(draws, chain);
    let names: Vec<String> = (0..columns).map(|c| format!("c{}", c)).collect();
    writeln!(text, "{}", names.join(",")).unwrap();
    for d in 0..draws {
        let row: Vec<String> = (0..columns)
            .map(|c| format!("{}", chain * 1_000_000 + d * 100 + c))
            .collect();
        writeln!(text, "{}", row.join(",")).unwrap();
    }
    text
}

fn write_chains(dir: &TempDir, chains: &[String]) -> Vec<PathBuf> {
    chains
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let path = dir.path().join(format!("output-{}.csv", i + 1));
            fs::write(&path, text).unwrap();
            path
        })
        .collect()
}

#[test]
fn test_array_shape_for_any_run_size() {
    init_logger();
    for num_chains in 1..=3 {
        for &draws in &[1, 2, 7] {
            for &columns in &[1, 4] {
                let dir = TempDir::new().unwrap();
                let texts: Vec<String> = (0..num_chains)
                    .map(|c| generic_chain(c, draws, columns))
                    .collect();
                let run = Run::from_completed(write_chains(&dir, &texts), Context::default());
                let array = run.draws().unwrap();
                assert_eq!(array.shape(), (draws, num_chains, columns));
                let last = num_chains - 1;
                assert_eq!(
                    array.values()[[draws - 1, last, columns - 1]],
                    (last * 1_000_000 + (draws - 1) * 100 + columns - 1) as f64
                );
            }
        }
    }
}

#[test]
fn test_end_to_end_four_chains() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let texts: Vec<String> = (0..4).map(|c| bernoulli_chain(c, 1000, 1000)).collect();
    let mut run = Run::from_completed(write_chains(&dir, &texts), Context::default());
    run.set_elapsed(Duration::from_millis(48));

    assert!(!run.is_built());
    let array = run.draws().unwrap();
    assert!(run.is_built());
    assert_eq!(array.shape(), (1000, 4, 8));
    assert_eq!(array.configs()[2].id, Some(3));
    assert_eq!(array.configs()[0].stepsize, Some(0.92));

    let index = run.column_index().unwrap();
    assert_eq!(index.column("theta"), Some(7));
    assert_eq!(index.columns_of("theta").unwrap(), vec![7]);
    assert_eq!(index.shape_of("theta").unwrap(), &ParameterShape::Scalar);

    let summary = run.summary(Some(&["theta"][..])).unwrap();
    let theta = summary.get("theta").unwrap();
    assert!(theta.mean > 0.0 && theta.mean < 1.0);
    assert!(theta.quantile(0.05).unwrap() >= 0.0);
    assert!(theta.quantile(0.95).unwrap() <= 1.0);
    assert!(theta.n_eff > 0.0 && theta.n_eff <= 4000.0);
    assert!(theta.n_eff_per_sec.is_some());
    assert!(theta.r_hat < 1.1, "r_hat = {}", theta.r_hat);

    let all = run.summary(None).unwrap();
    assert_eq!(all.rows.len(), 8);
    for row in &all.rows {
        assert!(row.n_eff > 0.0 && row.n_eff <= 4000.0, "{}: {}", row.name, row.n_eff);
    }

    let report = run.diagnose().unwrap();
    assert_eq!(report.total_draws, 4000);
    assert_eq!(report.num_divergent, 0);
    assert_eq!(report.num_max_treedepth, 0);
    assert_eq!(report.ebfmi.len(), 4);
    assert!(report.high_rhat.is_empty());
    assert!(report.to_string().contains("Treedepth satisfactory"));

    // cached: the same array comes back
    assert!(Arc::ptr_eq(&array, &run.draws().unwrap()));
}

#[test]
fn test_column_count_mismatch() {
    let dir = TempDir::new().unwrap();
    let texts = vec![generic_chain(0, 5, 3), generic_chain(1, 5, 4)];
    let run = Run::from_completed(write_chains(&dir, &texts), Context::default());
    let err = run.draws().unwrap_err();
    assert!(matches!(err, Error::Consistency { chain: 1, .. }), "{}", err);
    assert!(!run.is_built());
}

#[test]
fn test_column_order_mismatch() {
    let dir = TempDir::new().unwrap();
    let swapped = generic_chain(1, 5, 3).replacen("c0,c1,c2", "c1,c0,c2", 1);
    let texts = vec![generic_chain(0, 5, 3), swapped];
    let run = Run::from_completed(write_chains(&dir, &texts), Context::default());
    let err = run.draws().unwrap_err();
    assert!(matches!(err, Error::Consistency { chain: 1, .. }), "{}", err);
    assert!(!run.is_built());
}

#[test]
fn test_truncated_chain() {
    let dir = TempDir::new().unwrap();
    let texts = vec![
        bernoulli_chain(0, 1000, 1000),
        bernoulli_chain(1, 1000, 1000),
        bernoulli_chain(2, 1000, 900),
        bernoulli_chain(3, 1000, 1000),
    ];
    let run = Run::from_completed(write_chains(&dir, &texts), Context::default());
    let err = run.draws().unwrap_err();
    match &err {
        Error::Consistency { chain, message } => {
            assert_eq!(*chain, 2);
            assert!(message.contains("900"));
        }
        other => panic!("unexpected error {}", other),
    }
    assert_eq!(err.chain(), Some(2));
    assert!(!run.is_built());
}

#[test]
fn test_non_numeric_field() {
    let dir = TempDir::new().unwrap();
    let mut bad = generic_chain(1, 5, 3);
    bad = bad.replacen("1000200,1000201", "1000200,oops", 1);
    let texts = vec![generic_chain(0, 5, 3), bad];
    let run = Run::from_completed(write_chains(&dir, &texts), Context::default());
    let err = run.draws().unwrap_err();
    match err {
        Error::Parse {
            chain, line, field, ..
        } => {
            assert_eq!(chain, 1);
            // 17 preamble lines, the header, then draws 1 and 2
            assert_eq!(line, 21);
            assert_eq!(field, Some(2));
        }
        other => panic!("unexpected error {}", other),
    }
    assert!(!run.is_built());
}

#[test]
fn test_chain_must_be_completed() {
    let dir = TempDir::new().unwrap();
    let texts = vec![generic_chain(0, 5, 2), generic_chain(1, 5, 2)];
    let mut run = Run::new(write_chains(&dir, &texts), Context::default());
    for id in 0..2 {
        run.set_chain_state(id, ChainState::Running).unwrap();
    }
    run.set_chain_state(0, ChainState::Completed).unwrap();
    assert!(matches!(
        run.draws().unwrap_err(),
        Error::IncompleteRun { chain: 1, .. }
    ));

    run.set_chain_state(1, ChainState::Completed).unwrap();
    assert_eq!(run.draws().unwrap().shape(), (5, 2, 2));
}

#[test]
fn test_concurrent_first_access_shares_one_array() {
    let dir = TempDir::new().unwrap();
    let texts: Vec<String> = (0..4).map(|c| bernoulli_chain(c, 500, 500)).collect();
    let run = Arc::new(Run::from_completed(write_chains(&dir, &texts), Context::default()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let run = run.clone();
            thread::spawn(move || run.draws().unwrap())
        })
        .collect();
    let arrays: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(arrays.iter().all(|a| Arc::ptr_eq(a, &arrays[0])));

    run.invalidate();
    assert!(!run.is_built());
    let rebuilt = run.draws().unwrap();
    assert!(!Arc::ptr_eq(&rebuilt, &arrays[0]));
    assert_eq!(rebuilt.values(), arrays[0].values());
}

#[test]
fn test_matrix_parameter_reconstruction() {
    let dir = TempDir::new().unwrap();
    let mut texts = Vec::new();
    for chain in 0..2 {
        let mut text = preamble(6, chain);
        text.push_str("lp__,m.1.1,m.2.1,m.1.2,m.2.2,m.1.3,m.2.3\n");
        for d in 0..6 {
            let mut row = vec![format!("{}", -(d as f64))];
            for j in 1..=3 {
                for i in 1..=2 {
                    row.push(format!("{}", chain * 1000 + d * 100 + i * 10 + j));
                }
            }
            writeln!(text, "{}", row.join(",")).unwrap();
        }
        texts.push(text);
    }
    let run = Run::from_completed(write_chains(&dir, &texts), Context::default());
    assert_eq!(
        run.column_index().unwrap().shape_of("m").unwrap(),
        &ParameterShape::Matrix(2, 3)
    );
    let m = run.variable("m").unwrap();
    assert_eq!(m.shape(), &[6, 2, 2, 3]);
    let array = run.draws().unwrap();
    for d in 0..6 {
        for c in 0..2 {
            for i in 1..=2 {
                for j in 1..=3 {
                    let col = array.index().column(&format!("m.{}.{}", i, j)).unwrap();
                    assert_eq!(m[[d, c, i - 1, j - 1]], array.values()[[d, c, col]]);
                    assert_eq!(m[[d, c, i - 1, j - 1]], (c * 1000 + d * 100 + i * 10 + j) as f64);
                }
            }
        }
    }
}

#[test]
fn test_row_major_engine_convention() {
    let ctx = Context::from_toml_str("index_order = \"row_major\"").unwrap();
    assert_eq!(ctx.index_order, IndexOrder::RowMajor);

    let dir = TempDir::new().unwrap();
    let mut text = preamble(2, 0);
    text.push_str("m.1.1,m.1.2,m.2.1,m.2.2\n1,2,3,4\n5,6,7,8\n");
    let paths = write_chains(&dir, &[text]);

    let run = Run::from_completed(paths.clone(), ctx);
    let m = run.variable("m").unwrap();
    assert_eq!(m[[0, 0, 0, 1]], 2.0);
    assert_eq!(m[[1, 0, 1, 0]], 7.0);

    // the same file violates the column-major convention
    let run = Run::from_completed(paths, Context::default());
    assert!(matches!(run.draws().unwrap_err(), Error::Parse { chain: 0, .. }));
}

#[test]
fn test_concurrent_callers_share_a_failed_build() {
    let dir = TempDir::new().unwrap();
    let texts = vec![
        bernoulli_chain(0, 1000, 1000),
        bernoulli_chain(1, 1000, 1000),
        bernoulli_chain(2, 1000, 900),
    ];
    let run = Arc::new(Run::from_completed(write_chains(&dir, &texts), Context::default()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let run = run.clone();
            thread::spawn(move || run.draws().map(|_| ()))
        })
        .collect();
    for handle in handles {
        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Consistency { chain: 2, .. }), "{}", err);
    }
    assert!(!run.is_built());
}
