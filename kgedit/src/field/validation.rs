use crate::schema::FieldDefinition;

pub const REQUIRED_MESSAGE: &str = "This field is marked as required.";

/// Validation messages are only shown for fields the user touched, or that
/// already carried a value when they were loaded.
pub fn should_validate(has_changed: bool, initial_is_empty: bool) -> bool {
    has_changed || !initial_is_empty
}

pub fn required_warning(definition: &FieldDefinition, is_empty: bool) -> Option<String> {
    if definition.is_required && is_empty {
        Some(REQUIRED_MESSAGE.to_string())
    } else {
        None
    }
}

/// Character count bounds of a text value
pub fn length_warning(definition: &FieldDefinition, text: &str) -> Option<String> {
    let len = text.chars().count();
    if let Some(max) = definition.max_length {
        if len > max {
            return Some(format!("Maximum {max} characters allowed ({len} entered)."));
        }
    }
    if let Some(min) = definition.min_length {
        if len > 0 && len < min {
            return Some(format!("At least {min} characters required ({len} entered)."));
        }
    }
    None
}

/// Item count bounds of a multi-valued field
pub fn items_warning(definition: &FieldDefinition, count: usize) -> Option<String> {
    match (definition.min_items, definition.max_items) {
        (Some(min), Some(max)) if count < min || count > max => {
            Some(format!("Number of values should be between {min} and {max}."))
        }
        (Some(min), None) if count < min => {
            Some(format!("Number of values should be at least {min}."))
        }
        (None, Some(max)) if count > max => {
            Some(format!("Number of values should be at most {max}."))
        }
        _ => None,
    }
}

pub fn number_warning(definition: &FieldDefinition, number: f64) -> Option<String> {
    if let Some(min) = definition.min_value {
        if number < min {
            return Some(format!("Value should be greater than or equal to {min}."));
        }
    }
    if let Some(max) = definition.max_value {
        if number > max {
            return Some(format!("Value should be less than or equal to {max}."));
        }
    }
    None
}

pub fn regex_warning(definition: &FieldDefinition, text: &str) -> Option<String> {
    let pattern = definition.regex.as_deref()?;
    if text.is_empty() {
        return None;
    }
    match regex::Regex::new(pattern) {
        Ok(re) if !re.is_match(text) => {
            Some(format!("Value does not match the expected format ({pattern})."))
        }
        Ok(_) => None,
        Err(e) => {
            log::warn!("Ignoring invalid validation pattern '{pattern}': {e}");
            None
        }
    }
}

/// First warning among length and pattern rules of a text value
pub fn text_warning(definition: &FieldDefinition, text: &str) -> Option<String> {
    length_warning(definition, text).or_else(|| regex_warning(definition, text))
}
