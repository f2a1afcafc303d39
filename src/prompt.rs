//! Summary instructions and prompt assembly.

/// Extracted text beyond this many characters is cut before prompting.
pub const MAX_CONTEXT_CHARS: usize = 500_000;

pub const TRUNCATION_NOTICE: &str = "\n\n[Content truncated due to length...]";

const YOUTUBE_GUIDE: &str = "Summarize the main points and detailed explanations from the script below.
Begin with the video title caption, starting with `#`.
Use section headings marked with `##` and include relevant emojis for each section.
Each section should be written as a cohesive paragraph that clearly and thoroughly conveys the main ideas.
The summary should be informative, concise, and resemble an executive news article.
Maintain a direct and objective tone.
Do not use phrases like \"the script provides.\"
Write the summary in {language}.";

const PAPER_GUIDE: &str = "Summarize the main points from the PDF document using markdown bullet points.
Maintain the numbering and titles of chapters, sections, and subsections as in the paper's table of contents.
Stay faithful to the original content without making arbitrary modifications.
Ensure the summary is sufficiently detailed and not too short.
Use primarily {language}, with English for technical terms.
Apply heading level 1 (#) for title captions, level 2 (##) for chapter captions, level 3 (###) for section captions, and level 4 (####) for subsection captions.
Use $...$ for inline math and $$...$$ for block math.";

const WEB_PAGE_GUIDE: &str = "The context is the content of a webpage. Provide a concise summary formatted in Markdown.
Use headers, bullet points, and other Markdown formatting to make the summary structured and readable.
Write the summary in {language}.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Youtube,
    Paper,
    WebPage,
}

impl SummaryKind {
    pub fn guide(self, language: &str) -> String {
        let template = match self {
            SummaryKind::Youtube => YOUTUBE_GUIDE,
            SummaryKind::Paper => PAPER_GUIDE,
            SummaryKind::WebPage => WEB_PAGE_GUIDE,
        };
        template.replace("{language}", language)
    }
}

/// Cuts `text` to at most `limit` characters, marking the cut.
pub fn truncate_context(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => {
            let mut result = String::with_capacity(end + TRUNCATION_NOTICE.len());
            result.push_str(&text[..end]);
            result.push_str(TRUNCATION_NOTICE);
            result
        }
        None => text.to_string(),
    }
}

pub fn build_prompt(context: &str, guide: &str) -> String {
    let context = truncate_context(context, MAX_CONTEXT_CHARS);
    let mut result = String::with_capacity(context.len() + guide.len() + 80);
    result.push_str("Based on the following context, answer the question:\n\n");
    result.push_str("Context: ");
    result.push_str(&context);
    result.push_str("\n\n");
    result.push_str("Question: ");
    result.push_str(guide);
    result
}
