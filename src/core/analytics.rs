use super::types::{Analytics, ComputedYear};

/// Cumulative series and lifetime totals in one forward scan.
pub fn aggregate(years: &[ComputedYear]) -> Analytics {
    let mut analytics = Analytics {
        cumulative_cash_flow: Vec::with_capacity(years.len()),
        cumulative_gross_income: Vec::with_capacity(years.len()),
        cumulative_after_tax_income: Vec::with_capacity(years.len()),
        cumulative_tax: Vec::with_capacity(years.len()),
        ..Analytics::default()
    };

    let mut cash_flow = 0.0;
    for year in years {
        cash_flow += year.waterfall.net_cash_flow;
        analytics.lifetime_gross_income += year.waterfall.gross_income;
        analytics.lifetime_tax += year.waterfall.total_tax;
        analytics.lifetime_after_tax_income += year.waterfall.after_tax_income;
        analytics.warning_count += year.warnings.len();

        analytics.cumulative_cash_flow.push(cash_flow);
        analytics
            .cumulative_gross_income
            .push(analytics.lifetime_gross_income);
        analytics
            .cumulative_after_tax_income
            .push(analytics.lifetime_after_tax_income);
        analytics.cumulative_tax.push(analytics.lifetime_tax);

        if analytics.peak_net_worth_year.is_none() || year.net_worth > analytics.peak_net_worth {
            analytics.peak_net_worth = year.net_worth;
            analytics.peak_net_worth_year = Some(year.year);
        }
    }

    if let Some(last) = years.last() {
        analytics.final_net_worth = last.net_worth;
        analytics.average_after_tax_income =
            analytics.lifetime_after_tax_income / years.len() as f64;
    }
    if analytics.lifetime_gross_income > 0.0 {
        analytics.lifetime_average_tax_rate =
            analytics.lifetime_tax / analytics.lifetime_gross_income;
    }
    analytics
}
