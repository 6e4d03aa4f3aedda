//! Slides: a titled block of markdown used to introduce or summarize material.
//! Slides are not evaluated or graded.

use crate::activity::ActivityConfig;
use crate::error::GenerationError;
use crate::plugin::{ActivityTypePlugin, GenConfigArgs, GenerationConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SLIDE_TYPE: &str = "slide";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    pub title: String,
    pub markdown_content: String,
}

pub struct SlidePlugin;

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "type": { "const": SLIDE_TYPE },
            "title": { "type": "string" },
            "markdownContent": { "type": "string" }
        },
        "required": ["type", "title", "markdownContent"]
    })
}

#[async_trait]
impl ActivityTypePlugin for SlidePlugin {
    fn activity_type(&self) -> &str {
        SLIDE_TYPE
    }

    async fn gen_config(
        &self,
        args: &GenConfigArgs<'_>,
    ) -> Result<GenerationConfig, GenerationError> {
        Ok(GenerationConfig {
            usage_guidance: Some(
                "Use slides to introduce material before practice or to summarize it afterwards."
                    .to_string(),
            ),
            ..GenerationConfig::new(
                schema(),
                format!(
                    "Write a slide presenting one idea about {} in a few short markdown \
                     paragraphs or bullet points.",
                    args.subject
                ),
            )
        })
    }

    fn empty_config(&self) -> Option<ActivityConfig> {
        ActivityConfig::encode(
            SLIDE_TYPE,
            &Slide {
                title: String::new(),
                markdown_content: String::new(),
            },
            None,
        )
        .ok()
    }
}
