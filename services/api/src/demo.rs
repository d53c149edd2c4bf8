use crate::infra::IndicativePricing;
use chrono::NaiveDate;
use clap::Args;
use loan_intake::error::AppError;
use loan_intake::wizard::{
    Answers, ApplicationType, AuthSession, MemoryStore, PersistencePort, SubEntityKind,
    SubmitOutcome, UserProfile, WizardService,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Flow to walk through: mortgage-calculation, mortgage-refinance,
    /// credit-calculation or credit-refinance
    #[arg(long, default_value = "mortgage-calculation", value_parser = parse_flow)]
    pub(crate) flow: ApplicationType,
    /// Submit the first step once with a missing field to show the rejection path
    #[arg(long)]
    pub(crate) show_rejection: bool,
}

fn parse_flow(raw: &str) -> Result<ApplicationType, String> {
    raw.parse::<ApplicationType>().map_err(|err| err.to_string())
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

fn first_step(flow: ApplicationType) -> Answers {
    match flow {
        ApplicationType::MortgageCalculation => Answers::new()
            .with("price_of_estate", 1_800_000.0)
            .with("city_where_you_buy", "tel_aviv")
            .with("when_do_you_need_money", "option_2")
            .with("property_ownership", "option_1")
            .with("initial_fee", 600_000.0)
            .with("type_select", "option_1")
            .with("will_be_your_first", "option_1")
            .with("period", 25.0),
        ApplicationType::MortgageRefinance => Answers::new()
            .with("why_refinancing", "option_1")
            .with("mortgage_balance", 750_000.0)
            .with("price_of_estate", 2_100_000.0)
            .with("type_select", "option_1")
            .with("bank", "bank_leumi")
            .with("property_registered", "option_1")
            .with("start_date", date(2018, 6, 1))
            .with("period", 20.0),
        ApplicationType::CreditCalculation => Answers::new()
            .with("purpose_of_loan", "option_1")
            .with("loan_amount", 90_000.0)
            .with("when_do_you_need_money", "option_1")
            .with("loan_deferral", "option_1")
            .with("period", 5.0),
        ApplicationType::CreditRefinance => Answers::new()
            .with("refinancing_credit_goal", "option_1")
            .with("period", 6.0),
    }
}

fn personal_data() -> Answers {
    Answers::new()
        .with("name_surname", "Avi Cohen")
        .with("birthday", date(1987, 11, 3))
        .with("education", "option_3")
        .with("additional_citizenships", false)
        .with("taxes", false)
        .with("children_under_18", false)
        .with("medical_insurance", true)
        .with("is_foreigner", false)
        .with("public_person", false)
        .with("borrowers", 1.0)
        .with("family_status", "single")
}

fn income() -> Answers {
    Answers::new()
        .with("main_source_of_income", "employee")
        .with("monthly_income", 24_000.0)
        .with("employment_start_date", date(2016, 3, 1))
        .with("field_of_activity", "option_2")
        .with("profession", "Architect")
        .with("company_name", "Cohen Design")
        .with("additional_income", "option_1")
        .with("obligation", "option_1")
}

fn existing_entries(flow: ApplicationType) -> Vec<(SubEntityKind, Answers)> {
    match flow {
        ApplicationType::MortgageRefinance => vec![
            (
                SubEntityKind::ExistingMortgage,
                Answers::new()
                    .with("program", "prime")
                    .with("balance", 450_000.0)
                    .with("end_date", date(2038, 6, 1)),
            ),
            (
                SubEntityKind::ExistingMortgage,
                Answers::new()
                    .with("program", "fixed")
                    .with("balance", 300_000.0)
                    .with("end_date", date(2035, 1, 1)),
            ),
        ],
        ApplicationType::CreditRefinance => vec![(
            SubEntityKind::ExistingCredit,
            Answers::new()
                .with("bank", "bank_discount")
                .with("amount", 65_000.0)
                .with("monthly_payment", 1_900.0)
                .with("start_date", date(2023, 2, 1))
                .with("end_date", date(2027, 2, 1)),
        )],
        _ => Vec::new(),
    }
}

fn describe(outcome: &SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::Advanced { step } => format!("advanced to step {step}"),
        SubmitOutcome::Submitted => "application submitted".to_string(),
        SubmitOutcome::AuthenticationRequired { pending } => {
            format!("sign-in required before {pending:?}")
        }
        SubmitOutcome::Rerouted {
            application_type,
            step,
            ..
        } => format!("rerouted to {application_type} step {step}"),
        SubmitOutcome::Rejected { issues, violations } => format!(
            "rejected: {} field issue(s), {} reconciliation violation(s)",
            issues.len(),
            violations.len()
        ),
        SubmitOutcome::StepMismatch { expected, received } => {
            format!("step mismatch: expected {expected}, received {received}")
        }
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        flow,
        show_rejection,
    } = args;

    let persistence = PersistencePort::new(Arc::new(MemoryStore::default()), Duration::ZERO);
    let service = WizardService::new(persistence, Arc::new(IndicativePricing::default()));

    println!("Loan intake wizard demo ({flow})");
    let view = service.open(flow);
    println!(
        "  step {}/{}: {} rule(s), required: {}",
        view.current_step,
        view.step_count,
        view.ruleset.rules.len(),
        view.ruleset.required_fields().collect::<Vec<_>>().join(", ")
    );

    for (collection, fields) in existing_entries(flow) {
        let mutation = service.create_sub_entity(flow, collection, None, &fields)?;
        println!("  added {} #{}", mutation.collection, mutation.local_id);
    }

    if show_rejection {
        let mut incomplete = first_step(flow);
        incomplete.remove("period");
        let response = service.submit(flow, 1, &incomplete);
        println!("  step 1 without a period: {}", describe(&response.outcome));
    }

    let steps = [
        first_step(flow),
        personal_data(),
        income(),
        Answers::new().with("selected_bank", "bank_hapoalim"),
    ];
    for (index, answers) in steps.iter().enumerate() {
        let step = index as u8 + 1;
        let mut response = service.submit(flow, step, answers);
        println!("  step {step}: {}", describe(&response.outcome));

        if matches!(response.outcome, SubmitOutcome::AuthenticationRequired { .. }) {
            let session = AuthSession {
                token: "demo-session".to_string(),
                profile: UserProfile {
                    name: "Avi Cohen".to_string(),
                    phone: "+972501234567".to_string(),
                },
            };
            response = service.complete_authentication(flow, &session);
            println!("  signed in: {}", describe(&response.outcome));
        }

        for warning in &response.view.reconciliation.warnings {
            println!("    warning {}: {}", warning.rule_id, warning.error_code);
        }
        if !response.outcome.is_accepted() {
            println!("  stopping; the flow did not advance");
            return Ok(());
        }
        if step == response.view.step_count - 1 {
            let quote = service.quote(flow)?;
            println!(
                "  indicative offer: {:.2}/month at {:.2}% ({:.2} total)",
                quote.monthly_payment, quote.rate_percent, quote.total_repayment
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_completes_every_flow() {
        for flow in ApplicationType::ALL {
            run_demo(DemoArgs {
                flow,
                show_rejection: true,
            })
            .expect("demo runs");
        }
    }

    #[test]
    fn flow_names_accept_either_separator() {
        assert_eq!(
            parse_flow("credit-refinance"),
            Ok(ApplicationType::CreditRefinance)
        );
        assert_eq!(
            parse_flow("mortgage_refinance"),
            Ok(ApplicationType::MortgageRefinance)
        );
        assert!(parse_flow("leasing").is_err());
    }
}
