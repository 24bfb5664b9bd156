//! ASP.NET form state extraction
//!
//! Parsing is synchronous: `scraper::Html` is not `Send`, so it must never
//! live across an `.await`.

use scraper::{Html, Selector};
use std::collections::HashMap;

use super::PortalError;

/// Hidden state and control names read from the fetched form page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState {
    /// State inputs found on the page, in configured order
    pub hidden: Vec<(String, String)>,
    /// Control `id` to `name` (`ctl00_cphBody_txtPlanName` -> `ctl00$cphBody$txtPlanName`)
    pub control_names: HashMap<String, String>,
}

impl FormState {
    /// Name to post a mapped key under
    pub fn post_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.control_names.get(key).map(String::as_str).unwrap_or(key)
    }
}

fn selector(css: &str) -> Result<Selector, PortalError> {
    Selector::parse(css).map_err(|e| PortalError::Config(format!("selector '{}': {}", css, e)))
}

/// Read configured state fields and the control table from a form page
///
/// Fails with `UnexpectedPage` when any `required` field is absent, which
/// usually means an error page or login redirect came back instead of the
/// form.
pub fn extract_form_state(
    html: &str,
    state_fields: &[String],
    required: &[String],
) -> Result<FormState, PortalError> {
    let document = Html::parse_document(html);

    let mut inputs: HashMap<&str, &str> = HashMap::new();
    for input in document.select(&selector("input[name]")?) {
        if let Some(name) = input.value().attr("name") {
            inputs
                .entry(name)
                .or_insert_with(|| input.value().attr("value").unwrap_or(""));
        }
    }

    let missing: Vec<&str> = required
        .iter()
        .map(String::as_str)
        .filter(|field| !inputs.contains_key(field))
        .collect();
    if !missing.is_empty() {
        return Err(PortalError::UnexpectedPage(missing.join(", ")));
    }

    let hidden = state_fields
        .iter()
        .filter_map(|field| {
            inputs
                .get(field.as_str())
                .map(|value| (field.clone(), value.to_string()))
        })
        .collect();

    let mut control_names = HashMap::new();
    for control in document.select(&selector("input[id][name], select[id][name], textarea[id][name]")?) {
        let element = control.value();
        if let (Some(id), Some(name)) = (element.attr("id"), element.attr("name")) {
            control_names.insert(id.to_string(), name.to_string());
        }
    }

    // List items carry `<list id>_<n>` ids; the list id itself is on a wrapper
    for item in document.select(&selector("input[type=radio][id][name], input[type=checkbox][id][name]")?) {
        let element = item.value();
        if let (Some(id), Some(name)) = (element.attr("id"), element.attr("name")) {
            // Checkbox list items post under their own `$<n>` name
            if item_index_suffix(name, '$').is_some() {
                continue;
            }
            if let Some(list_id) = item_index_suffix(id, '_') {
                control_names
                    .entry(list_id.to_string())
                    .or_insert_with(|| name.to_string());
            }
        }
    }

    Ok(FormState {
        hidden,
        control_names,
    })
}

/// `base` when `value` is `<base><sep><digits>`
fn item_index_suffix(value: &str, sep: char) -> Option<&str> {
    let (base, index) = value.rsplit_once(sep)?;
    let numeric = !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit());
    (numeric && !base.is_empty()).then_some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM_PAGE: &str = r#"
        <html><body>
        <form method="post" action="./?loc=2378" id="aspnetForm">
          <input type="hidden" name="__EVENTTARGET" id="__EVENTTARGET" value="" />
          <input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="dDwtMTA4NzI=" />
          <input type="hidden" name="__VIEWSTATEGENERATOR" id="__VIEWSTATEGENERATOR" value="CA0B0334" />
          <input name="ctl00$cphBody$txtBuilderName" type="text" id="ctl00_cphBody_txtBuilderName" />
          <select name="ctl00$cphBody$ddlProvince" id="ctl00_cphBody_ddlProvince"><option>GA</option></select>
          <textarea name="ctl00$cphBody$txtSpecialInstructions" id="ctl00_cphBody_txtSpecialInstructions"></textarea>
          <table id="ctl00_cphBody_rblRoofingFrame"><tr>
            <td><input id="ctl00_cphBody_rblRoofingFrame_0" type="radio" name="ctl00$cphBody$rblRoofingFrame" value="Trusses" /></td>
            <td><input id="ctl00_cphBody_rblRoofingFrame_1" type="radio" name="ctl00$cphBody$rblRoofingFrame" value="Rafters" /></td>
          </tr></table>
          <table id="ctl00_cphBody_cblOptions"><tr>
            <td><input id="ctl00_cphBody_cblOptions_0" type="checkbox" name="ctl00$cphBody$cblOptions$0" /></td>
          </tr></table>
        </form>
        </body></html>
    "#;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extracts_present_state_fields_in_order() {
        let state = extract_form_state(
            FORM_PAGE,
            &fields(&["__VIEWSTATE", "__VIEWSTATEGENERATOR", "__EVENTVALIDATION", "__EVENTTARGET"]),
            &fields(&["__VIEWSTATE"]),
        )
        .unwrap();

        assert_eq!(
            state.hidden,
            vec![
                ("__VIEWSTATE".to_string(), "dDwtMTA4NzI=".to_string()),
                ("__VIEWSTATEGENERATOR".to_string(), "CA0B0334".to_string()),
                ("__EVENTTARGET".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_control_names_resolve_ids() {
        let state = extract_form_state(FORM_PAGE, &[], &[]).unwrap();

        assert_eq!(state.post_name("ctl00_cphBody_txtBuilderName"), "ctl00$cphBody$txtBuilderName");
        assert_eq!(state.post_name("ctl00_cphBody_ddlProvince"), "ctl00$cphBody$ddlProvince");
        assert_eq!(
            state.post_name("ctl00_cphBody_txtSpecialInstructions"),
            "ctl00$cphBody$txtSpecialInstructions"
        );
        assert_eq!(state.post_name("rblRoofingFrame"), "rblRoofingFrame");
    }

    #[test]
    fn test_radio_list_resolves_by_list_id() {
        let state = extract_form_state(FORM_PAGE, &[], &[]).unwrap();

        assert_eq!(state.post_name("ctl00_cphBody_rblRoofingFrame"), "ctl00$cphBody$rblRoofingFrame");
        assert_eq!(state.post_name("ctl00_cphBody_rblRoofingFrame_1"), "ctl00$cphBody$rblRoofingFrame");
        // Checkbox list items keep their own names; the list id is not guessed
        assert_eq!(state.post_name("ctl00_cphBody_cblOptions"), "ctl00_cphBody_cblOptions");
        assert_eq!(state.post_name("ctl00_cphBody_cblOptions_0"), "ctl00$cphBody$cblOptions$0");
    }

    #[test]
    fn test_missing_required_state_is_unexpected_page() {
        let err = extract_form_state(
            "<html><body><h1>Service Unavailable</h1></body></html>",
            &fields(&["__VIEWSTATE"]),
            &fields(&["__VIEWSTATE"]),
        )
        .unwrap_err();

        assert!(matches!(err, PortalError::UnexpectedPage(ref f) if f == "__VIEWSTATE"));
        assert!(err.is_retryable());
    }
}
