//! Entry dispatcher.
//!
//! Runs before the real service. Captures the arguments the return phase
//! will need into slots and decides whether the real service runs.
//!
//! | Call                    | Slots written                  | Action                 |
//! |-------------------------|--------------------------------|------------------------|
//! | QueryInformationProcess | class (1), buffer (2), len (4) | Continue               |
//! | QueryInformationThread  | class (1), buffer (2), len (3) | Continue               |
//! | GetContextThread        | context (1)                    | Continue               |
//! | SetInformationThread    | none                           | Redirect if hide class |
//! | Close                   | status, overwrite flag         | Redirect always        |

use veil_core::call::{Action, CallId, Substitute};
use veil_core::exec::ExecutionContext;
use veil_core::info_class;
use veil_core::machine::MachineState;
use veil_core::memory::MemoryAccess;
use veil_core::object::{Handle, HandleTable};
use veil_core::slots::{SlotId, SlotStore};

use crate::close::decide_and_close;
use crate::Plugin;

pub fn on_entry<S, M, H, X>(plugin: &Plugin<S, M, H, X>, call: CallId, state: &mut dyn MachineState) -> Action
where
    S: SlotStore,
    M: MemoryAccess,
    H: HandleTable,
    X: ExecutionContext,
{
    let thread = state.thread_key();
    let slots = &plugin.slots;

    match call {
        CallId::QueryInformationProcess => {
            slots.set(thread, SlotId::ProcessInfoClass, state.read_argument(1));
            slots.set(thread, SlotId::ProcessInfoPtr, state.read_argument(2));
            slots.set(thread, SlotId::ProcessInfoLenPtr, state.read_argument(4));
            Action::Continue
        }
        CallId::QueryInformationThread => {
            slots.set(thread, SlotId::ThreadInfoClass, state.read_argument(1));
            slots.set(thread, SlotId::ThreadInfoPtr, state.read_argument(2));
            slots.set(thread, SlotId::ThreadInfoLenPtr, state.read_argument(3));
            Action::Continue
        }
        CallId::GetContextThread => {
            slots.set(thread, SlotId::ContextThreadPtr, state.read_argument(1));
            Action::Continue
        }
        CallId::SetInformationThread => {
            if state.read_argument(1) == info_class::thread::HIDE_FROM_DEBUGGER {
                Action::Redirect(Substitute::SetInformationThread)
            } else {
                Action::Continue
            }
        }
        CallId::Close => {
            let handle = Handle(state.read_argument(0));
            let status = decide_and_close(&plugin.handles, &plugin.exec, handle);
            slots.set(thread, SlotId::CloseReturnValue, status.to_slot());
            slots.set(thread, SlotId::CloseOverwriteFlag, 1);
            Action::Redirect(Substitute::Close)
        }
    }
}
