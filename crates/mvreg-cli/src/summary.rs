use std::path::Path;

use anyhow::Result;
use console::Style;
use mvreg_core::registration::config::RegistrationConfig;
use mvreg_core::registration::BatchResult;
use mvreg_core::{Archive, ImageType};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    failed: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            failed: Style::new().red().bold(),
            path: Style::new().underlined(),
        }
    }
}

fn print_title(s: &Styles, title: &str) {
    println!();
    println!("  {}", s.title.apply_to(title));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(title.chars().count())));
    println!();
}

pub fn print_registration_summary(config: &RegistrationConfig, archive: &Path) {
    let s = Styles::new();
    print_title(&s, "Multi-view Registration");

    println!(
        "  {:<14}{}",
        s.label.apply_to("Archive"),
        s.path.apply_to(archive.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Scale"),
        s.value.apply_to(format!("{}%", config.scale))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Channel"),
        s.value.apply_to(config.channel)
    );
    println!();

    println!("  {}", s.header.apply_to("Coarse alignment"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Axis"),
        s.value.apply_to(config.rot_axis)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Offset"),
        s.value.apply_to(format!("{:?}", config.offset))
    );
    println!();

    println!("  {}", s.header.apply_to("Optimizer"));
    match config.metric.resolve() {
        Ok(kind) => println!(
            "    {:<12}{}",
            s.label.apply_to("Metric"),
            s.method.apply_to(kind)
        ),
        Err(_) => println!(
            "    {:<12}{}",
            s.label.apply_to("Metric"),
            s.failed.apply_to(&config.metric.0)
        ),
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("Sampling"),
        s.value.apply_to(format!("{:.0}%", config.sampling.fraction * 100.0))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Iterations"),
        s.value.apply_to(config.optimizer.max_iterations)
    );
    if !config.write_results {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Results"),
            s.disabled.apply_to("not written")
        );
    }
    println!();
}

pub fn print_batch_results(results: &[(u32, BatchResult)]) {
    let s = Styles::new();
    println!("  {}", s.header.apply_to("Results"));

    if results.is_empty() {
        println!("    {}", s.disabled.apply_to("no views to register"));
    }
    for (index, result) in results {
        let label = format!("View {index}");
        match result {
            BatchResult::Registered(summary) => println!(
                "    {:<12}{} {}",
                s.label.apply_to(label),
                s.method.apply_to(format!(
                    "metric {:.4e} after {} iterations",
                    summary.final_metric_value, summary.iterations
                )),
                s.label.apply_to(format!("({})", summary.stop_condition))
            ),
            BatchResult::Skipped => println!(
                "    {:<12}{}",
                s.label.apply_to(label),
                s.disabled.apply_to("already registered, skipped")
            ),
            BatchResult::Failed(reason) => println!(
                "    {:<12}{}",
                s.label.apply_to(label),
                s.failed.apply_to(format!("failed: {reason}"))
            ),
        }
    }
    println!();
}

pub fn print_archive_contents(archive: &Archive) -> Result<()> {
    let s = Styles::new();
    print_title(&s, "Archive");
    println!(
        "  {:<14}{}",
        s.label.apply_to("Location"),
        s.path.apply_to(archive.root().display())
    );
    println!();

    for image_type in ImageType::ALL {
        let keys = archive.keys(image_type)?;
        println!(
            "  {:<14}{}",
            s.header.apply_to(image_type),
            s.value.apply_to(format!("{} view(s)", keys.len()))
        );
        for key in keys {
            let view = archive.get_view(&key)?;
            let shape = view.shape();
            let mut line = format!(
                "scale {:>3}  index {:>2}  channel {}  {}x{}x{}  angle {}",
                key.scale, key.index, key.channel, shape[0], shape[1], shape[2], view.angle
            );
            if image_type == ImageType::Registered
                && archive.has_transform(key.scale, key.index, key.channel)?
            {
                line.push_str("  +transform");
            }
            println!("    {}", s.label.apply_to(line));
        }
        println!();
    }
    Ok(())
}
