use super::{Locale, OptionItem, OptionSet};

struct BundledOptions {
    context: &'static str,
    field: &'static str,
    locale: &'static str,
    label: &'static str,
    placeholder: &'static str,
    options: &'static [(&'static str, &'static str)],
}

const BUNDLED: &[BundledOptions] = &[
    BundledOptions {
        context: "mortgage_step1",
        field: "property_ownership",
        locale: "en",
        label: "Property ownership",
        placeholder: "Select your situation",
        options: &[
            ("option_1", "I don't own a property"),
            ("option_2", "I own a property"),
            ("option_3", "I'm selling a property"),
        ],
    },
    BundledOptions {
        context: "mortgage_step1",
        field: "when_do_you_need_money",
        locale: "en",
        label: "When do you need the money?",
        placeholder: "Select a period",
        options: &[
            ("option_1", "Within 3 months"),
            ("option_2", "In 3 to 6 months"),
            ("option_3", "In 6 to 12 months"),
            ("option_4", "In more than 12 months"),
        ],
    },
    BundledOptions {
        context: "mortgage_step2",
        field: "family_status",
        locale: "en",
        label: "Family status",
        placeholder: "Select family status",
        options: &[
            ("option_1", "Single"),
            ("option_2", "Married"),
            ("option_3", "Divorced"),
            ("option_4", "Widowed"),
            ("option_5", "Common-law partner"),
            ("option_6", "Other"),
        ],
    },
    BundledOptions {
        context: "mortgage_step2",
        field: "education",
        locale: "en",
        label: "Education",
        placeholder: "Select education",
        options: &[
            ("option_1", "No high school diploma"),
            ("option_2", "Partial high school diploma"),
            ("option_3", "Full high school diploma"),
            ("option_4", "Post-secondary education"),
            ("option_5", "Bachelor's degree"),
            ("option_6", "Master's degree"),
            ("option_7", "Doctoral degree"),
        ],
    },
    BundledOptions {
        context: "mortgage_step3",
        field: "main_source_of_income",
        locale: "en",
        label: "Main source of income",
        placeholder: "Select source of income",
        options: &[
            ("option_1", "Employee"),
            ("option_2", "Self-employed"),
            ("option_3", "Business owner"),
            ("option_4", "Pensioner"),
            ("option_5", "Student"),
            ("option_6", "Unemployed"),
            ("option_7", "Other"),
        ],
    },
    BundledOptions {
        context: "mortgage_step3",
        field: "additional_income",
        locale: "en",
        label: "Additional income",
        placeholder: "Select additional income",
        options: &[
            ("option_1", "No additional income"),
            ("option_2", "Additional salary"),
            ("option_3", "Additional work"),
            ("option_4", "Property rental income"),
            ("option_5", "Investment income"),
            ("option_6", "Pension"),
            ("option_7", "Other"),
        ],
    },
    BundledOptions {
        context: "mortgage_step3",
        field: "obligation",
        locale: "en",
        label: "Existing obligations",
        placeholder: "Select obligation type",
        options: &[
            ("option_1", "No obligations"),
            ("option_2", "Bank loan"),
            ("option_3", "Consumer credit"),
            ("option_4", "Credit card debt"),
            ("option_5", "Other"),
        ],
    },
    BundledOptions {
        context: "credit_step1",
        field: "purpose_of_loan",
        locale: "en",
        label: "Purpose of the loan",
        placeholder: "Select a purpose",
        options: &[
            ("option_1", "Car purchase"),
            ("option_2", "Wedding or event"),
            ("option_3", "Education"),
            ("option_4", "Debt consolidation"),
            ("option_5", "Vacation"),
            ("option_6", "House renovation"),
            ("option_7", "Other"),
        ],
    },
];

const DEFAULT_MESSAGES: &[(&str, &str)] = &[
    ("error_fill_field", "Please fill this field"),
    ("error_select_answer", "Please select an answer"),
    ("error_min_value", "The value is below the allowed minimum"),
    ("error_max_value", "The value exceeds the allowed maximum"),
    ("error_invalid_format", "The value has an invalid format"),
    (
        "error_balance",
        "The sum of the itemized balances must equal the total balance",
    ),
    ("error_date_order", "The end date must be after the start date"),
    (
        "error_none_exclusive",
        "\"None\" cannot be combined with other entries",
    ),
    (
        "error_property_ownership_required",
        "Please select your property ownership status",
    ),
    (
        "warning_high_ltv",
        "The requested financing exceeds the recommended loan-to-value ratio",
    ),
];

/// Statically bundled options, preferring the exact locale and then English.
pub fn bundled_options(context: &str, field: &str, locale: &Locale) -> Option<OptionSet> {
    let find = |wanted: &str| {
        BUNDLED.iter().find(|entry| {
            entry.context == context && entry.field == field && entry.locale == wanted
        })
    };

    find(locale.as_str()).or_else(|| find("en")).map(|entry| OptionSet {
        options: entry
            .options
            .iter()
            .map(|(value, label)| OptionItem {
                value: value.to_string(),
                label: label.to_string(),
            })
            .collect(),
        label: Some(entry.label.to_string()),
        placeholder: Some(entry.placeholder.to_string()),
    })
}

/// Built-in English text for a validation code.
pub fn default_message(code: &str) -> Option<&'static str> {
    DEFAULT_MESSAGES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, text)| *text)
}
