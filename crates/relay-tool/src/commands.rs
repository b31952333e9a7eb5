use std::io::Write;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use relay_backend::{CostMatrix, Optimizer, RelayTable, RouteMatrix};

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn load_cost_matrix(path: &Path) -> anyhow::Result<CostMatrix> {
    let data = read(path)?;
    CostMatrix::from_bytes(&data)
        .with_context(|| format!("decoding cost matrix {}", path.display()))
}

fn load_route_matrix(path: &Path) -> anyhow::Result<RouteMatrix> {
    let data = read(path)?;
    RouteMatrix::from_bytes(&data)
        .with_context(|| format!("decoding route matrix {}", path.display()))
}

pub fn optimize(
    input: &Path,
    output: &Path,
    rtt_tolerance: u32,
    segments: Option<usize>,
) -> anyhow::Result<String> {
    let data = read(input)?;
    let cost_matrix = CostMatrix::from_bytes(&data)
        .with_context(|| format!("decoding cost matrix {}", input.display()))?;

    let mut optimizer = Optimizer::new(rtt_tolerance);
    if let Some(s) = segments {
        optimizer = optimizer.segments(s);
    }
    let started = Instant::now();
    let mut route_matrix = optimizer.optimize(&cost_matrix);
    let elapsed = started.elapsed();
    tracing::debug!(
        "optimize: {} relays in {}ms",
        cost_matrix.num_relays(),
        elapsed.as_millis()
    );

    route_matrix.created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    route_matrix.cost_matrix_size = data.len() as u32;
    route_matrix.optimize_time_ms = elapsed.as_millis() as u32;
    let bytes = route_matrix.to_bytes()?;
    std::fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;

    Ok(format!(
        "optimized {} relays in {}ms, wrote {} bytes to {}",
        cost_matrix.num_relays(),
        elapsed.as_millis(),
        bytes.len(),
        output.display()
    ))
}

pub fn analyze(input: &Path, json: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let route_matrix = load_route_matrix(input)?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &route_matrix.analyze())?;
        writeln!(out)?;
    } else {
        route_matrix.write_analysis_to(out)?;
    }
    Ok(())
}

pub fn routes(input: &Path, src: &str, dst: &str, out: &mut impl Write) -> anyhow::Result<()> {
    let route_matrix = load_route_matrix(input)?;
    let index = |name: &str| {
        route_matrix
            .relays
            .index_by_name(name)
            .with_context(|| format!("no relay named {name:?}"))
    };
    let (from, to) = (index(src)?, index(dst)?);
    if from == to {
        bail!("source and destination are the same relay");
    }
    route_matrix.write_pair_routes(out, from, to)?;
    Ok(())
}

pub fn debug(input: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    load_route_matrix(input)?.write_routes_to(out)?;
    Ok(())
}

/// Accepts either matrix kind; both carry the same relay table.
pub fn relays(input: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let data = read(input)?;
    let table = match CostMatrix::from_bytes(&data) {
        Ok(cm) => cm.relays,
        Err(_) => {
            RouteMatrix::from_bytes(&data)
                .with_context(|| format!("{} is neither a cost nor a route matrix", input.display()))?
                .relays
        }
    };
    write_relays(&table, out)
}

fn write_relays(table: &RelayTable, out: &mut impl Write) -> anyhow::Result<()> {
    writeln!(out, "index,name,address,id,datacenter,destination,price")?;
    for i in 0..table.len() {
        writeln!(
            out,
            "{i},{},{},{:016x},{:x},{},{}",
            table.names[i],
            table.addresses[i],
            table.ids[i],
            table.datacenter_ids[i],
            table.dest_relays[i],
            table.prices[i]
        )?;
    }
    Ok(())
}
