/// Domain agnostic utility functions
mod regex;

pub use regex::regex_match_groups;
