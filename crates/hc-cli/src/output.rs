use hc_domain::Appliance;

/// Render the one-line-per-appliance summary used by `list`.
pub fn render_list(appliances: &[Appliance]) -> String {
    if appliances.is_empty() {
        return "No appliances paired.".to_string();
    }
    let mut out = String::new();
    for a in appliances {
        let state = a
            .operation_state()
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<20} {:<24} {:<10} {}\n",
            a.ha_id,
            a.name.as_deref().unwrap_or("-"),
            if a.connected { "online" } else { "offline" },
            state,
        ));
    }
    out
}

/// Render the full detail view used by `show`.
pub fn render_detail(appliance: &Appliance) -> String {
    let mut out = format!(
        "{} ({})\n  brand: {}\n  type: {}\n  connected: {}\n",
        appliance.name.as_deref().unwrap_or(&appliance.ha_id),
        appliance.ha_id,
        appliance.brand.as_deref().unwrap_or("-"),
        appliance.appliance_type.as_deref().unwrap_or("-"),
        appliance.connected,
    );

    if let Some(program) = &appliance.active_program {
        out.push_str(&format!("  active program: {}\n", program.key));
    }
    if let Some(program) = &appliance.selected_program {
        out.push_str(&format!("  selected program: {}\n", program.key));
    }

    for status in appliance.status.values() {
        out.push_str(&format!(
            "  status: {} = {}\n",
            status.key,
            status.value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_list_handles_empty_slice() {
        assert_eq!(render_list(&[]), "No appliances paired.");
    }

    #[test]
    fn render_list_formats_one_appliance_per_line() {
        let appliance = Appliance::new("ha1", "Oven", "BSH", "Oven");
        let rendered = render_list(&[appliance]);
        assert!(rendered.contains("ha1"));
        assert!(rendered.contains("online"));
    }
}
