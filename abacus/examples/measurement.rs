//! Batch measurement driver: one party of a two-party attribution session.
//!
//! Usage: `measurement <params.json> <threshold>`
//!
//! Reads the party's table from the CSV named in the parameter file, brings
//! up the two-socket TCP transport, runs the full pipeline, and prints the
//! revealed attribution. Exits non-zero on parameter or network failure.

use abacus::Measurement;
use binnacle::TwoTcpChannel;
use paddlepop::{csv_io, PsiParams};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let params_path = args.next().ok_or("usage: measurement <params.json> <threshold>")?;
    let threshold: f64 = args
        .next()
        .ok_or("usage: measurement <params.json> <threshold>")?
        .parse()?;

    let params = PsiParams::from_json(&std::fs::read_to_string(&params_path)?)?;
    let (keys, features) = csv_io::read_data_file(
        &params.common.input_file,
        params.common.ids_num,
        params.common.has_header,
    )?;
    let features: Vec<Vec<f64>> = features
        .into_iter()
        .map(|column| column.into_iter().map(|v| v as f64).collect())
        .collect();

    let mut channel = TwoTcpChannel::connect(
        &params.common.address,
        params.common.remote_port,
        params.common.local_port,
    )?;

    let mut session = Measurement::init(&params, &mut channel)?;
    let result = session.measure(&mut channel, threshold, &keys, &features)?;
    println!(
        "attribution = {} (intersection size {})",
        result,
        session.intersection_size()
    );
    Ok(())
}
