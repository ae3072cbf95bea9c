// Tool (function-call) schemas for structured extraction

use serde_json::{json, Value};

pub const ARTICLE_TOOL: &str = "set_article_information";
pub const ALERT_TOOL: &str = "send_portfolio_alert";
pub const TRANSLATION_TOOL: &str = "set_translation";

pub const SENTIMENT_SCORE_RANGE: (i64, i64) = (-10, 10);
pub const INTEREST_SCORE_RANGE: (i64, i64) = (0, 10);
pub const ALERT_LEVEL_RANGE: (i64, i64) = (1, 5);

pub const ARTICLE_CLASSIFICATIONS: &[&str] = &[
    "Individual Company News",
    "Company PR",
    "Company Results",
    "Political Analysis",
    "Lawsuit",
    "Market News",
    "Stock Analysis",
    "Sector Analysis",
    "Economic Report",
    "Regulatory Update",
    "Analyst Recommendation",
    "Analyst Prediction",
    "AI Generated Article",
    "Opinion/Editorial",
    "Rage Bait",
    "Gossip",
    "Advertisement",
    "Technical Analysis",
    "Insider Trading Report",
    "Mergers and Acquisitions",
    "IPO News",
    "Dividend News",
    "Earnings Preview",
    "Earnings Call Summary",
    "Macro Trend Analysis",
    "International Markets",
    "Central Bank Policy",
    "Commodity News",
    "Cryptocurrency News",
    "ESG and Sustainability",
    "Retail Investor Trends",
    "Institutional Investor Trends",
    "Other",
];

/// Font Awesome icon names the model may pick as the sentiment.
pub const SENTIMENT_ICONS: &[&str] = &[
    "rocket", "anchor", "bat", "wine-bottle", "toilet-paper", "sausage",
    "chess-queen", "chess-pawn", "tired", "surprise", "smile-wink", "smile-beam",
    "sad-tear", "sad-cry", "meh-rolling-eyes", "meh-blank", "meh", "laugh-wink",
    "laugh-squint", "laugh-beam", "laugh-laugh", "kiss-wink-heart", "kiss-beam",
    "kiss", "grin-wink", "grin-tongue-wink", "grin-tongue-squint", "grin-tongue",
    "grin-tears", "grin-stars", "grin-squint-tears", "grin-squint", "grin-hearts",
    "grin-beam-sweat", "grin-beam", "grin-alt", "grin", "grimace", "frown-open",
    "frown", "flushed", "dizzy", "angry",
];

const NO_BULLSHIT: &str =
    "Translate from bullshit to no-bullshit. Be funny and sarcastic. Shorten text.";

pub fn article_information_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": ARTICLE_TOOL,
            "description": "Set all the information about the text provided",
            "parameters": {
                "type": "object",
                "properties": {
                    "gif_keywords": {
                        "type": "string",
                        "description": "use the sentiment to create a list of human emotions, no markdown, only comma separated list"
                    },
                    "title_clickbait": {
                        "type": "string",
                        "description": "Build the most click bait title possible, to show how ridiculous they can get."
                    },
                    "title": {
                        "type": "string",
                        "description": "a one line title describing the text"
                    },
                    "paragraph": {
                        "type": "string",
                        "description": "a one paragraph, not long text. This should be a small very short summary to display as a note"
                    },
                    "summary": {
                        "type": "string",
                        "description": "a two to three paragraph summary"
                    },
                    "no_bullshit": {
                        "type": "string",
                        "description": NO_BULLSHIT
                    },
                    "sentiment": {
                        "type": "string",
                        "enum": SENTIMENT_ICONS,
                        "description": "The sentiment will be an icon from font-awesome. It is preferable to have a smiley from the supplied list."
                    },
                    "sentiment_score": {
                        "type": "integer",
                        "description": "A value from -10 to 10 that represents how much impact will have on the stock. -10 means will go down, 10 bullish"
                    },
                    "interest_score": {
                        "type": "integer",
                        "description": "How interesting is this text to read if you were a teenager or a millennial, score from 0 to 10."
                    },
                    "classification": {
                        "type": "string",
                        "enum": ARTICLE_CLASSIFICATIONS,
                        "description": "Article classification, or source"
                    }
                },
                "required": [
                    "paragraph",
                    "sentiment",
                    "title",
                    "summary",
                    "title_clickbait",
                    "no_bullshit",
                    "gif_keywords",
                    "interest_score"
                ]
            }
        }
    })
}

pub fn portfolio_alert_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": ALERT_TOOL,
            "description": "Send a DEFCON-style alert about an article that could affect stock prices based on its importance, like the value is going go up or down.",
            "parameters": {
                "type": "object",
                "properties": {
                    "defcon_level": {
                        "type": "integer",
                        "description": "The DEFCON level of urgency, ranging from 1 (most critical) to 5 (least critical)."
                    },
                    "defcon_outcome": {
                        "type": "string",
                        "description": "Good or bad outcome",
                        "enum": ["positive", "negative"]
                    },
                    "defcon_alert": {
                        "type": "string",
                        "description": "A brief explanation of the alert's significance."
                    },
                    "defcon_ticker": {
                        "type": "string",
                        "description": "Ticker to monitor"
                    },
                    "actions_required": {
                        "type": "string",
                        "description": "The recommended actions for the user in response to the alert."
                    }
                },
                "required": ["defcon_level", "defcon_alert", "defcon_outcome"]
            }
        }
    })
}

pub fn translation_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": TRANSLATION_TOOL,
            "description": "As an expert native and professional translator, transcribe the text adjusted to the locale required.",
            "parameters": {
                "type": "object",
                "properties": {
                    "translation": {
                        "type": "string",
                        "description": "result of the translation"
                    },
                    "editor_comments": {
                        "type": "string",
                        "description": "Any comments on the transcript"
                    }
                },
                "required": ["translation", "editor_comments"]
            }
        }
    })
}

/// Name of the function a tool schema declares.
pub fn tool_name(tool: &Value) -> Option<&str> {
    tool.pointer("/function/name").and_then(Value::as_str)
}
