/// What the assembler pulled out of one raw fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssembledFragment {
    pub text: Option<String>,
    pub conversation_id: Option<String>,
}

impl AssembledFragment {
    pub fn is_empty(&self) -> bool {
        return self.text.is_none() && self.conversation_id.is_none();
    }
}
