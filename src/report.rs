//! CLI report: loads a snapshot file, runs the simulator and prints the
//! per-node utilization table with aggregate utilization stats.

use std::path::Path;

use average::{concatenate, Estimate, Max, Mean, Min, Variance};
use prettytable::{row, Table};

use crate::core::common::bytes_to_gib;
use crate::pricing::{PriceTable, PriceView};
use crate::sim::result::SimulationResult;
use crate::sim::simulator::run_simulation;
use crate::store::io;

concatenate!(
    UtilizationStats,
    [Min, min],
    [Max, max],
    [Mean, mean],
    [Variance, population_variance]
);

pub fn print_report(snapshot_path: &Path, prices: &PriceTable) -> anyhow::Result<()> {
    let snapshot = io::load_snapshot(snapshot_path)?;
    let view = PriceView::new(&snapshot.prices, prices);
    let result = run_simulation(&snapshot, &view);
    print_simulation(&result);
    Ok(())
}

pub fn print_simulation(result: &SimulationResult) {
    let mut nodes_table = Table::new();
    nodes_table.add_row(row![
        "Node",
        "Pool",
        "Instance",
        "CPU req/alloc (m)",
        "RAM req/alloc (GiB)",
        "RAM util %",
        "Hours",
        "Cost/day USD",
        "Flags"
    ]);

    let mut ram_util = UtilizationStats::new();
    for node_row in result.nodes.iter() {
        ram_util.add(node_row.ram_util_pct);

        let mut flags: Vec<&str> = vec![];
        if node_row.is_virtual {
            flags.push("virtual");
        }
        if !node_row.is_active {
            flags.push("idle");
        }
        if node_row.price_missing {
            flags.push("no-price");
        }

        nodes_table.add_row(row![
            node_row.node,
            node_row.nodepool,
            node_row.instance,
            format!("{}/{}", node_row.sum_req_cpu_m, node_row.alloc_cpu_m),
            format!(
                "{:.1}/{:.1}",
                bytes_to_gib(node_row.sum_req_mem_b),
                bytes_to_gib(node_row.alloc_mem_b)
            ),
            format!("{:.1}", node_row.ram_util_pct),
            format!("{:.1}", node_row.effective_hours),
            format!("{:.2}", node_row.cost_daily_usd),
            flags.join(",")
        ]);
    }
    nodes_table.printstd();

    let mut pools_table = Table::new();
    pools_table.add_row(row!["Pool", "Nodes", "Actual USD/day", "Projected USD/day"]);
    for (pool, stat) in result.summary.pool_stats.iter() {
        let projected = result
            .summary
            .projected_pool_stats
            .get(pool)
            .cloned()
            .unwrap_or_default();
        pools_table.add_row(row![
            pool,
            stat.nodes_count,
            format!("{:.2}", stat.cost_usd),
            format!("{:.2}", projected.cost_usd)
        ]);
    }
    pools_table.printstd();

    if !result.nodes.is_empty() {
        println!(
            "RAM utilization %: min={:.1} max={:.1} mean={:.1} variance={:.1}",
            ram_util.min(),
            ram_util.max(),
            ram_util.mean(),
            ram_util.population_variance()
        );
    }
    println!(
        "Total: actual {:.2} USD/day, projected {:.2} USD/day",
        result.summary.total_cost_daily_usd, result.summary.projected_total_cost_usd
    );
}
